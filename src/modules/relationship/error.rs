use crate::api::error;

#[derive(thiserror::Error, Debug)]
pub enum RelationshipError {
    #[error("A user cannot target themselves")]
    InvalidSelfReference,
    #[error("Users are already friends")]
    AlreadyFriends,
    #[error("Friend request already exists")]
    DuplicateRequest,
    #[error("Message must be at most 200 characters long")]
    MessageTooLong,
    #[error("A block exists between these users")]
    Blocked,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Relationship changed concurrently, retry the operation")]
    Conflict,
    #[error("Relationship store timed out")]
    Timeout,
    #[error(transparent)]
    Store(error::SystemError),
}

impl From<error::SystemError> for RelationshipError {
    fn from(value: error::SystemError) -> Self {
        match value {
            error::SystemError::Conflict(meta) => {
                if let Some(meta) = meta {
                    log::debug!("Relationship row conflict: {}", meta);
                }
                RelationshipError::Conflict
            }
            other => RelationshipError::Store(other),
        }
    }
}

impl From<tokio::time::error::Elapsed> for RelationshipError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RelationshipError::Timeout
    }
}

impl From<RelationshipError> for error::Error {
    fn from(value: RelationshipError) -> Self {
        let message = value.to_string();
        match value {
            RelationshipError::InvalidSelfReference | RelationshipError::MessageTooLong => {
                error::Error::bad_request(message)
            }
            RelationshipError::AlreadyFriends
            | RelationshipError::DuplicateRequest
            | RelationshipError::Conflict => error::Error::conflict(message),
            RelationshipError::Blocked => error::Error::forbidden(message),
            RelationshipError::NotFound(_) => error::Error::not_found(message),
            RelationshipError::Timeout => error::Error::service_unavailable(message),
            RelationshipError::Store(err) => err.into(),
        }
    }
}
