//! Wire types for the verification response.

use axum::http::StatusCode;
use idcheck_core::SimilarityResult;
use idcheck_extract::ExtractedFields;
use serde::{Deserialize, Serialize};

/// Machine-readable outcome codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Success,
    InvalidInput,
    UnsupportedFileType,
    FaceDetectionError,
    NoFaceDetected,
    FaceDetectionFailed,
    VerificationFailed,
    ProcessingError,
}

impl ResponseCode {
    /// HTTP status carried alongside the code.
    ///
    /// `verification_failed` is 200: extraction success is reported
    /// independently of the face-match outcome.
    pub fn http_status(self) -> StatusCode {
        match self {
            ResponseCode::Success | ResponseCode::VerificationFailed => StatusCode::OK,
            ResponseCode::InvalidInput
            | ResponseCode::UnsupportedFileType
            | ResponseCode::NoFaceDetected
            | ResponseCode::FaceDetectionFailed => StatusCode::BAD_REQUEST,
            ResponseCode::FaceDetectionError | ResponseCode::ProcessingError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Extracted fields plus the face-match outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationData {
    #[serde(flatten)]
    pub fields: ExtractedFields,
    pub verification_result: bool,
    pub similarity_score: f64,
}

/// The single response object assembled per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub success: bool,
    pub message: String,
    pub code: ResponseCode,
    pub data: Option<VerificationData>,
}

impl VerificationResponse {
    /// Response for a request that ran the full pipeline.
    pub fn completed(fields: ExtractedFields, similarity: SimilarityResult) -> Self {
        let data = VerificationData {
            fields,
            verification_result: similarity.verified,
            similarity_score: round3(similarity.score),
        };
        if similarity.verified {
            Self {
                success: true,
                message: "Face verified and document data extracted".to_string(),
                code: ResponseCode::Success,
                data: Some(data),
            }
        } else {
            Self {
                success: true,
                message: "Faces do not match; document data extracted".to_string(),
                code: ResponseCode::VerificationFailed,
                data: Some(data),
            }
        }
    }

    /// Response for a request that failed fatally. Partial data gathered
    /// before the failure, if any, rides along instead of being discarded.
    pub fn failed(code: ResponseCode, message: String, data: Option<VerificationData>) -> Self {
        Self {
            success: false,
            message,
            code,
            data,
        }
    }
}

/// Round a similarity score to three decimals for the wire.
pub fn round3(score: f32) -> f64 {
    (score as f64 * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ResponseCode::NoFaceDetected).unwrap();
        assert_eq!(json, "\"no_face_detected\"");
        let json = serde_json::to_string(&ResponseCode::UnsupportedFileType).unwrap();
        assert_eq!(json, "\"unsupported_file_type\"");
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.51234), 0.512);
        assert_eq!(round3(-0.3), -0.3);
        assert_eq!(round3(0.9996), 1.0);
    }

    #[test]
    fn test_verification_failed_is_http_200() {
        assert_eq!(ResponseCode::VerificationFailed.http_status(), StatusCode::OK);
        assert_eq!(ResponseCode::NoFaceDetected.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ResponseCode::FaceDetectionError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_data_flattens_fields() {
        let mut fields = ExtractedFields::default();
        fields.id_number = "A1".into();
        let data = VerificationData {
            fields,
            verification_result: true,
            similarity_score: 0.75,
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["id_number"], "A1");
        assert_eq!(value["verification_result"], true);
        assert_eq!(value["similarity_score"], 0.75);
    }
}
