use crate::validators::{MaxSizeValidator, RecordValidator};
use sdn_core::{validate_schema_name, SdnError, VALIDATION_TIMEOUT_SECS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Schema names recognized by every node on the network.
///
/// One entry per space-data standard the exchange carries (orbital elements,
/// conjunction messages, entity profiles, …) plus the reserved profile
/// notification schema.
pub const BUILTIN_SCHEMAS: &[&str] = &[
    "CAT", "CDM", "CRM", "CSM", "EME", "EOO", "EOP", "EPM", "HYP", "LDM", "MET", "MPE", "OCM",
    "OEM", "OMM", "OSM", "PLD", "PNM", "PRG", "RFM", "ROC", "SCM", "SIT", "TDM", "TIM", "VCM",
];

/// The closed schema set with a validator capability per name.
pub struct SchemaRegistry {
    validators: HashMap<String, Arc<dyn RecordValidator>>,
    validation_timeout: Duration,
}

impl SchemaRegistry {
    /// Empty registry with the default validation deadline.
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
            validation_timeout: Duration::from_secs(VALIDATION_TIMEOUT_SECS),
        }
    }

    /// Registry pre-populated with every builtin schema behind the
    /// structural validator.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for name in BUILTIN_SCHEMAS {
            reg.register(name, Arc::new(MaxSizeValidator::default()))
                .expect("builtin schema names pass the name predicate");
        }
        reg
    }

    /// Override the validation deadline (default 5 s).
    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Register (or replace) the validator for `name`.
    pub fn register(
        &mut self,
        name: &str,
        validator: Arc<dyn RecordValidator>,
    ) -> Result<(), SdnError> {
        validate_schema_name(name)?;
        self.validators.insert(name.to_string(), validator);
        Ok(())
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.validators.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate `blob` against the named schema under the registry deadline.
    ///
    /// Unknown schema and malformed names fail before any validator runs. The
    /// validator itself executes on the blocking pool so a slow decode cannot
    /// stall the async runtime, and the deadline converts a hung validator
    /// into `ValidationTimeout`.
    pub async fn validate(&self, name: &str, blob: &[u8]) -> Result<(), SdnError> {
        validate_schema_name(name)?;
        let validator = self
            .validators
            .get(name)
            .cloned()
            .ok_or_else(|| SdnError::UnknownSchema(name.to_string()))?;

        let blob = blob.to_vec();
        let outcome = tokio::time::timeout(
            self.validation_timeout,
            tokio::task::spawn_blocking(move || validator.validate(&blob)),
        )
        .await;

        match outcome {
            Err(_) => {
                debug!(schema = %name, "validation deadline elapsed");
                Err(SdnError::ValidationTimeout)
            }
            Ok(Err(join)) => Err(SdnError::Other(format!("validator panicked: {join}"))),
            Ok(Ok(result)) => result,
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtin_covers_the_exchange_set() {
        let reg = SchemaRegistry::builtin();
        for name in ["OMM", "CDM", "EPM", "PNM"] {
            assert!(reg.has_schema(name), "{name}");
        }
        assert!(!reg.has_schema("XYZ"));
    }

    #[tokio::test]
    async fn validates_known_schema() {
        let reg = SchemaRegistry::builtin();
        assert!(reg.validate("OMM", &[1, 2, 3]).await.is_ok());
        assert!(matches!(
            reg.validate("OMM", &[]).await,
            Err(SdnError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_schema_fails() {
        let reg = SchemaRegistry::builtin();
        assert!(matches!(
            reg.validate("NOPE", &[1]).await,
            Err(SdnError::UnknownSchema(_))
        ));
    }

    #[tokio::test]
    async fn malformed_name_fails_before_lookup() {
        let reg = SchemaRegistry::builtin();
        assert!(matches!(
            reg.validate("../OMM", &[1]).await,
            Err(SdnError::InvalidSchemaName)
        ));
    }

    #[tokio::test]
    async fn hung_validator_times_out() {
        struct Stall;
        impl RecordValidator for Stall {
            fn validate(&self, _blob: &[u8]) -> Result<(), SdnError> {
                std::thread::sleep(std::time::Duration::from_secs(5));
                Ok(())
            }
        }

        let mut reg = SchemaRegistry::new().with_validation_timeout(Duration::from_millis(50));
        reg.register("OMM", Arc::new(Stall)).unwrap();
        assert!(matches!(
            reg.validate("OMM", &[1]).await,
            Err(SdnError::ValidationTimeout)
        ));
    }
}
