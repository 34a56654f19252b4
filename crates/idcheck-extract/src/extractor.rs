//! Quota-aware field extraction with bounded credential rotation.

use crate::credentials::CredentialPool;
use crate::fields::{parse_reply, ExtractedFields};
use crate::gemini::{ExtractError, ExtractionBackend};

/// Instruction sent with every document image. Requests the nine fields as
/// pure parse-ready JSON, with empty values for anything the model cannot
/// find on the card.
pub const EXTRACTION_PROMPT: &str = "\
Analyze the attached identity card image and extract the following \
information:

1. **ID Number**: the unique identification number on the card.
2. **First Names**: the card holder's first names.
3. **Last Name**: the card holder's last name.
4. **Nationality**: the card holder's nationality.
5. **Date of Birth**: the card holder's date of birth.
6. **Place of Birth**: the card holder's place of birth.
7. **Issuing Authority**: the authority that issued the card.
8. **Date of Expiry**: the card's expiry date.
9. **Card Number**: the identity card number.

Return the extracted information as **pure JSON**, with no extra formatting \
or commentary. Make sure the output is valid JSON so it parses without \
errors.

If some information cannot be found on the image, return the JSON with empty \
fields as shown below:

{
    \"id_number\": \"\",
    \"first_names\": \"\",
    \"last_name\": \"\",
    \"nationality\": \"\",
    \"date_of_birth\": \"\",
    \"place_of_birth\": \"\",
    \"issuing_authority\": \"\",
    \"date_of_expiry\": \"\",
    \"card_number\": \"\"
}";

/// Bounded busy-retry policy for quota failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first included. Quota failures retry until the
    /// budget is spent; every other failure aborts immediately.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 30 }
    }
}

/// Field extraction front-end: prompt, retry policy, credential rotation.
pub struct FieldExtractor<B> {
    backend: B,
    pool: CredentialPool,
    policy: RetryPolicy,
}

impl<B: ExtractionBackend> FieldExtractor<B> {
    pub fn new(backend: B, pool: CredentialPool, policy: RetryPolicy) -> Self {
        Self {
            backend,
            pool,
            policy,
        }
    }

    /// Extract the nine fields from a PNG-encoded document image.
    ///
    /// Never fails: quota exhaustion past the retry budget, transport
    /// errors and unparseable replies all degrade to the all-empty field
    /// set, each with a structured warning so the degradation is auditable.
    pub async fn extract(&self, image_png: &[u8]) -> ExtractedFields {
        match self.request_with_rotation(image_png).await {
            Ok(reply) => parse_reply(&reply).unwrap_or_else(|| {
                tracing::warn!(
                    reply_len = reply.len(),
                    "extraction reply was not parseable JSON, degrading to empty fields"
                );
                ExtractedFields::default()
            }),
            Err(error) => {
                tracing::warn!(error = %error, "extraction failed, degrading to empty fields");
                ExtractedFields::default()
            }
        }
    }

    async fn request_with_rotation(&self, image_png: &[u8]) -> Result<String, ExtractError> {
        let mut key = self.pool.primary();

        for attempt in 1..=self.policy.max_attempts {
            match self.backend.generate(key, EXTRACTION_PROMPT, image_png).await {
                Ok(reply) => return Ok(reply),
                Err(ExtractError::QuotaExhausted) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "extraction quota exhausted, rotating credential"
                    );
                    key = self.pool.rotate();
                }
                Err(error) => return Err(error),
            }
        }

        Err(ExtractError::QuotaExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ApiKey;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FIELDS_JSON: &str = r#"{"id_number": "ZZ42", "last_name": "Doe"}"#;

    /// Backend that fails with quota exhaustion a fixed number of times, then
    /// replies with `FIELDS_JSON`.
    struct QuotaThenSuccess {
        quota_failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ExtractionBackend for QuotaThenSuccess {
        async fn generate(
            &self,
            _key: &ApiKey,
            _prompt: &str,
            _image_png: &[u8],
        ) -> Result<String, ExtractError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.quota_failures {
                Err(ExtractError::QuotaExhausted)
            } else {
                Ok(FIELDS_JSON.to_string())
            }
        }
    }

    fn extractor(backend: QuotaThenSuccess) -> FieldExtractor<QuotaThenSuccess> {
        let pool = CredentialPool::new(
            ApiKey::new("primary"),
            vec![ApiKey::new("fb-1"), ApiKey::new("fb-2")],
        );
        FieldExtractor::new(backend, pool, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_success_on_final_attempt() {
        // 29 quota failures, success on attempt 30: inside the budget.
        let backend = QuotaThenSuccess {
            quota_failures: 29,
            calls: AtomicU32::new(0),
        };
        let ex = extractor(backend);
        let fields = ex.extract(b"png").await;
        assert_eq!(fields.id_number, "ZZ42");
        assert_eq!(fields.last_name, "Doe");
        assert_eq!(ex.backend.calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_degrades_to_empty() {
        // Quota failure on every attempt: exactly 30 calls, then empty fields.
        let backend = QuotaThenSuccess {
            quota_failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let ex = extractor(backend);
        let fields = ex.extract(b"png").await;
        assert_eq!(fields, ExtractedFields::default());
        assert_eq!(ex.backend.calls.load(Ordering::SeqCst), 30);
    }

    struct AlwaysApiError;

    #[async_trait]
    impl ExtractionBackend for AlwaysApiError {
        async fn generate(
            &self,
            _key: &ApiKey,
            _prompt: &str,
            _image_png: &[u8],
        ) -> Result<String, ExtractError> {
            Err(ExtractError::Api {
                status: 500,
                body: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_non_quota_error_degrades_without_retry() {
        let pool = CredentialPool::new(ApiKey::new("primary"), vec![]);
        let ex = FieldExtractor::new(AlwaysApiError, pool, RetryPolicy::default());
        let fields = ex.extract(b"png").await;
        assert_eq!(fields, ExtractedFields::default());
    }

    struct GarbageReply;

    #[async_trait]
    impl ExtractionBackend for GarbageReply {
        async fn generate(
            &self,
            _key: &ApiKey,
            _prompt: &str,
            _image_png: &[u8],
        ) -> Result<String, ExtractError> {
            Ok("the card appears to be upside down".to_string())
        }
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades_to_empty() {
        let pool = CredentialPool::new(ApiKey::new("primary"), vec![]);
        let ex = FieldExtractor::new(GarbageReply, pool, RetryPolicy::default());
        assert_eq!(ex.extract(b"png").await, ExtractedFields::default());
    }
}
