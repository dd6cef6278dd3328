use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Audit callback ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    /// Accept audit callbacks. When false the ingestion route is not mounted.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Keep the extracted prompt text on each event. Byte length is recorded
    /// either way.
    #[serde(default)]
    pub store_text: bool,

    /// Stored text is cut to this many bytes, on a character boundary.
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_text: false,
            max_text_bytes: default_max_text_bytes(),
        }
    }
}

impl IngestionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_text_bytes == 0 {
            return Err(ConfigError::Validation(
                "ingestion.max_text_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_text_bytes() -> usize {
    64 * 1024
}
