// Error types shared by the engine, the command dispatcher and the gateway bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    /// Bad command argument. Shown to the invoker as-is.
    #[error("{0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Missing permission: {0}")]
    PermissionDenied(&'static str),

    #[error("Command failed: {0}")]
    Dispatch(String),

    /// The platform rejected a command registration because it conflicts
    /// with what is already registered. Recovered by a hard resync.
    #[error("Command signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

impl BotError {
    /// Text shown to the invoking user. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Validation(msg) => msg.clone(),
            BotError::PermissionDenied(perm) => {
                format!("⛔ You need the **{perm}** permission to use this command.")
            }
            BotError::Storage(_) => {
                "The XP database is unavailable right now, try again later.".to_string()
            }
            BotError::Dispatch(_) | BotError::SignatureMismatch(_) | BotError::Platform(_) => {
                "An error occurred while running the command.".to_string()
            }
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Validation(_) => "validation",
            BotError::Storage(_) => "storage",
            BotError::PermissionDenied(_) => "permission",
            BotError::Dispatch(_) => "dispatch",
            BotError::SignatureMismatch(_) => "signature_mismatch",
            BotError::Platform(_) => "platform",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_passes_through() {
        let err = BotError::Validation("Amount must be >= 1.".into());
        assert_eq!(err.user_message(), "Amount must be >= 1.");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_storage_message_is_generic() {
        let err = BotError::from(sqlx::Error::PoolClosed);
        assert!(!err.user_message().contains("pool"));
        assert_eq!(err.kind(), "storage");
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = BotError::Dispatch("option `user` missing".into());
        assert_eq!(
            err.user_message(),
            "An error occurred while running the command."
        );
        assert_eq!(err.to_string(), "Command failed: option `user` missing");
    }

    #[test]
    fn test_permission_message() {
        let err = BotError::PermissionDenied("Manage Server");
        assert!(err.user_message().contains("Manage Server"));
    }
}
