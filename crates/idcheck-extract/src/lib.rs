//! idcheck-extract — structured personal-data extraction from document images.
//!
//! Sends the normalized document image to a remote vision-language model with
//! a fixed nine-field instruction, rotating credentials under quota pressure
//! and degrading to an empty field set rather than failing the request.

pub mod credentials;
pub mod extractor;
pub mod fields;
pub mod gemini;

pub use credentials::{ApiKey, CredentialPool};
pub use extractor::{FieldExtractor, RetryPolicy, EXTRACTION_PROMPT};
pub use fields::ExtractedFields;
pub use gemini::{ExtractError, ExtractionBackend, GeminiBackend};
