use serde_json::{Value, json};

/// Failures of a single tracking invocation.
///
/// Every variant maps onto a response status and a stable machine code, so the
/// handler can turn any of them into a structured error body. A missing stats
/// document is not an error and has no variant here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PulseError {
    /// The history page answered with a non-success status.
    #[error("Invalid topic has been provided: {title:?} (HTTP {status})")]
    InvalidTopic { title: String, status: u16 },

    /// The history page could not be reached at all.
    #[error("failed to fetch history for {title:?}: {message}")]
    Transport { title: String, message: String },

    /// The page has no history container.
    #[error("no page history found for {title:?}")]
    NoHistory { title: String },

    /// A change date did not match `HH:MM, D Month YYYY`.
    #[error("unrecognized change date {value:?} in history for {title:?}")]
    MalformedTimestamp { title: String, value: String },

    #[error("failed to read stats document {key}: {message}")]
    StorageRead { key: String, message: String },

    #[error("failed to write stats document {key}: {message}")]
    StorageWrite { key: String, message: String },

    /// HTTP client or URL construction failed before any request was sent.
    #[error("setup failed: {0}")]
    Setup(String),
}

impl PulseError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidTopic { .. } | Self::NoHistory { .. } => 404,
            Self::MalformedTimestamp { .. } => 422,
            Self::Transport { .. } => 502,
            Self::StorageRead { .. } | Self::StorageWrite { .. } | Self::Setup(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTopic { .. } => "invalid_topic",
            Self::Transport { .. } => "fetch_failed",
            Self::NoHistory { .. } => "no_history",
            Self::MalformedTimestamp { .. } => "malformed_history",
            Self::StorageRead { .. } => "storage_read_failed",
            Self::StorageWrite { .. } => "storage_write_failed",
            Self::Setup(_) => "setup_failed",
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::InvalidTopic { title, .. }
            | Self::Transport { title, .. }
            | Self::NoHistory { title }
            | Self::MalformedTimestamp { title, .. } => Some(title),
            Self::StorageRead { .. } | Self::StorageWrite { .. } | Self::Setup(_) => None,
        }
    }

    /// JSON error body: `{"error": {"code", "message", "title"}}`.
    pub fn to_body(&self) -> Value {
        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "title": self.title(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::PulseError;

    #[test]
    fn invalid_topic_keeps_the_legacy_message() {
        let error = PulseError::InvalidTopic {
            title: "Nope".to_string(),
            status: 404,
        };
        assert!(error.to_string().starts_with("Invalid topic has been provided"));
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.code(), "invalid_topic");
    }

    #[test]
    fn error_body_is_structured() {
        let error = PulseError::NoHistory {
            title: "Ghost".to_string(),
        };
        let body = error.to_body();
        assert_eq!(body["error"]["code"], "no_history");
        assert_eq!(body["error"]["title"], "Ghost");
        assert!(
            body["error"]["message"]
                .as_str()
                .is_some_and(|message| message.contains("Ghost"))
        );
    }

    #[test]
    fn storage_errors_have_no_title() {
        let error = PulseError::StorageRead {
            key: "parsed_wiki.json".to_string(),
            message: "bad json".to_string(),
        };
        assert_eq!(error.status_code(), 500);
        assert!(error.to_body()["error"]["title"].is_null());
    }
}
