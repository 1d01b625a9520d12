use thiserror::Error;

/// Separator between sender and body on the bus.
pub const DELIMITER: char = ':';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("relay payload has no ':' delimiter")]
    MissingDelimiter,

    #[error("invalid sender id {0:?}: must be non-empty and must not contain ':'")]
    InvalidSender(String),
}

/// Unit carried on the shared chat channel: `<sender_id>:<body>`.
///
/// Decoding splits on the first delimiter only, so the body may contain any
/// number of colons. Sender ids are validated at connection time so they can
/// never contain one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub sender_id: String,
    pub body: String,
}

impl RelayMessage {
    pub fn new(sender_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            body: body.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.sender_id, DELIMITER, self.body)
    }

    pub fn decode(payload: &str) -> Result<Self, WireError> {
        let (sender_id, body) = payload
            .split_once(DELIMITER)
            .ok_or(WireError::MissingDelimiter)?;
        Ok(Self::new(sender_id, body))
    }
}

pub fn validate_sender_id(user_id: &str) -> Result<(), WireError> {
    if user_id.is_empty() || user_id.contains(DELIMITER) {
        return Err(WireError::InvalidSender(user_id.to_string()));
    }
    Ok(())
}
