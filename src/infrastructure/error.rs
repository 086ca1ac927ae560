use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("constraint violation: {0}")]
    Conflict(String),
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("invariant breach: {0}")]
    InvariantBreach(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("credential error: {0}")]
    Credential(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl PlannerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::CollaboratorUnavailable(message) | Self::OAuth(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_detection_matches_network_messages() {
        assert!(PlannerError::CollaboratorUnavailable("network error while listing".to_string())
            .is_transient());
        assert!(PlannerError::OAuth("request timed out".to_string()).is_transient());
        assert!(!PlannerError::CollaboratorUnavailable("http 404".to_string()).is_transient());
        assert!(!PlannerError::validation("bad group").is_transient());
    }
}
