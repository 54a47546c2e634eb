//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::ClientError;

/// Default number of instance slots.
pub const DEFAULT_CAPACITY: u32 = 1024;

/// Render-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Fixed number of instance slots. Entities beyond this are not drawn.
    pub capacity: u32,
    /// Uniform scale applied to every visible instance.
    pub instance_scale: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            instance_scale: 1.0,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document, filling unspecified fields with defaults, and
    /// validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot back a render buffer.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "capacity must be positive".to_owned(),
            ));
        }
        if !(self.instance_scale > 0.0 && self.instance_scale.is_finite()) {
            return Err(ClientError::InvalidConfig(format!(
                "instance_scale must be positive and finite, got {}",
                self.instance_scale
            )));
        }
        Ok(())
    }
}
