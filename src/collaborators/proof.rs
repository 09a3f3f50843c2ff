use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::AppError;

/// Base64-encoded image captured at hand-over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfDelivery(String);

impl ProofOfDelivery {
    pub fn from_base64(encoded: impl Into<String>) -> Result<Self, AppError> {
        let encoded = encoded.into();
        let trimmed = encoded.trim();

        if trimmed.is_empty() {
            return Err(AppError::BadRequest(
                "proof of delivery cannot be empty".to_string(),
            ));
        }

        STANDARD
            .decode(trimmed)
            .map_err(|err| AppError::BadRequest(format!("proof of delivery is not base64: {err}")))?;

        Ok(Self(trimmed.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}
