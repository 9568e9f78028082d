use sdn_core::{SdnError, MAX_MESSAGE_BYTES};

/// Per-schema validation capability.
///
/// Implementations must be cheap to call repeatedly and free of interior
/// blocking; the registry runs them on the blocking pool under a deadline.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, blob: &[u8]) -> Result<(), SdnError>;
}

/// Structural validator: non-empty payload within a per-schema size bound.
///
/// The binary schema encodings this network carries are length-framed, so an
/// empty or oversized blob can be refused without decoding. Deeper decoding
/// belongs to schema-specific validators registered by the embedder.
pub struct MaxSizeValidator {
    max_bytes: usize,
}

impl MaxSizeValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.min(MAX_MESSAGE_BYTES),
        }
    }
}

impl Default for MaxSizeValidator {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_BYTES)
    }
}

impl RecordValidator for MaxSizeValidator {
    fn validate(&self, blob: &[u8]) -> Result<(), SdnError> {
        if blob.is_empty() {
            return Err(SdnError::ValidationFailed("empty payload".into()));
        }
        if blob.len() > self.max_bytes {
            return Err(SdnError::ValidationFailed(format!(
                "payload exceeds schema bound: {} > {} bytes",
                blob.len(),
                self.max_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_payload() {
        let v = MaxSizeValidator::new(16);
        assert!(v.validate(&[1, 2, 3]).is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        let v = MaxSizeValidator::new(4);
        assert!(v.validate(&[]).is_err());
        assert!(v.validate(&[0u8; 5]).is_err());
    }
}
