use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RPC command carried in event content:
///
/// ```json
/// {"method": "name", "args": ["arg1", 1, "arg3"]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub method: String,
    pub args: Vec<Value>,
}

impl CommandEnvelope {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Parse and validate an envelope. `method` must be a non-empty string and
    /// every arg must be a scalar (string, number, bool or null).
    pub fn parse(content: &str) -> Result<Self, EnvelopeError> {
        let envelope: CommandEnvelope = serde_json::from_str(content)?;

        if envelope.method.is_empty() {
            return Err(EnvelopeError::EmptyMethod);
        }
        if let Some(position) = envelope
            .args
            .iter()
            .position(|arg| arg.is_array() || arg.is_object())
        {
            return Err(EnvelopeError::NonScalarArg(position));
        }

        Ok(envelope)
    }

    pub fn to_json(&self) -> String {
        // A struct of String + Vec<Value> always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope method is empty")]
    EmptyMethod,
    #[error("envelope arg {0} is not a scalar")]
    NonScalarArg(usize),
}
