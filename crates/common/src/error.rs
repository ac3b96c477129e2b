use thiserror::Error;

/// Message shown for every link that can no longer be redeemed.
pub const LINK_UNAVAILABLE_MESSAGE: &str = "This link is invalid or has already been used.";

#[derive(Error, Debug)]
pub enum Error {
    #[error("No files were selected")]
    NoFiles,

    #[error("Too many files: {count} (at most {max} per upload)")]
    TooManyFiles { count: usize, max: usize },

    #[error("File is empty")]
    EmptyFile,

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("Unsupported file type: {0}")]
    InvalidType(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Access token collision")]
    DuplicateToken,

    #[error("Stored filename collision")]
    DuplicateStoredName,

    #[error("Token not found")]
    NotFound,

    #[error("Token already consumed")]
    Gone,

    #[error("Record is not pending")]
    NotPending,

    #[error("Stored file missing: {0}")]
    MissingArtifact(String),

    #[error("Failed to delete stored file: {0}")]
    DeleteFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Per-file input problems the uploader can fix themselves.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::NoFiles
                | Error::TooManyFiles { .. }
                | Error::EmptyFile
                | Error::FileTooLarge { .. }
                | Error::InvalidType(_)
                | Error::Decode(_)
        )
    }

    /// Outcomes meaning "this link will never show anything again".
    pub fn is_terminal_link(&self) -> bool {
        matches!(self, Error::NotFound | Error::Gone | Error::NotPending)
    }

    /// Text safe to show to an end user. Internal failures (collisions,
    /// storage, entropy) collapse to a generic message; the detail belongs
    /// in the logs.
    pub fn user_message(&self) -> String {
        if self.is_validation() {
            self.to_string()
        } else if self.is_terminal_link() {
            LINK_UNAVAILABLE_MESSAGE.to_string()
        } else {
            "Internal server error".to_string()
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_link_errors_share_one_message() {
        assert_eq!(Error::NotFound.user_message(), Error::Gone.user_message());
        assert_eq!(Error::Gone.user_message(), Error::NotPending.user_message());
        // Logs still tell them apart
        assert_ne!(Error::NotFound.to_string(), Error::Gone.to_string());
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = Error::Storage("connection refused to 10.0.0.3".to_string());
        assert_eq!(err.user_message(), "Internal server error");
        assert_eq!(Error::DuplicateToken.user_message(), "Internal server error");
    }

    #[test]
    fn test_validation_messages_are_shown() {
        let err = Error::FileTooLarge { size: 11, max: 10 };
        assert!(err.is_validation());
        assert!(err.user_message().contains("max 10"));
    }
}
