//! Error types for webuicapture

use thiserror::Error;

/// Result type for webuicapture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for webuicapture
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// JavaScript evaluated in the page threw
    #[error("JavaScript error: {text} at {line}:{column}")]
    Script { text: String, line: i32, column: i32 },

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// No element matches a selector
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decode error (e.g., base64)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Image could not be decoded or encoded
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,

    /// The collector could not be reached or rejected the payload
    #[error("Collector error: {0}")]
    Collector(String),

    /// A capture payload failed validation
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The relay router is gone
    #[error("Relay channel closed")]
    RelayClosed,
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Whether the error came from the collector side of a delivery
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Error::Collector(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Collector(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::cdp("Page.navigate", -32000, "Cannot navigate").to_string(),
            "CDP error in Page.navigate: Cannot navigate (code -32000)"
        );
        assert_eq!(
            Error::invalid("bbox out of range").to_string(),
            "Invalid payload: bbox out of range"
        );
        assert_eq!(
            Error::Script {
                text: "Uncaught".into(),
                line: 3,
                column: 7
            }
            .to_string(),
            "JavaScript error: Uncaught at 3:7"
        );
    }

    #[test]
    fn test_delivery_failure() {
        assert!(Error::Collector("connection refused".into()).is_delivery_failure());
        assert!(!Error::RelayClosed.is_delivery_failure());
    }

    #[test]
    fn test_base64_error_maps_to_decode() {
        use base64::Engine;
        let err: Error = base64::engine::general_purpose::STANDARD
            .decode("!!!")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Decode(_)));
    }
}
