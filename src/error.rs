use std::fmt;

use thiserror::Error;

/// Failures raised inside a document store while parsing or executing
/// filters, pipelines and update operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("document must be a JSON object")]
    NotAnObject,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("no document matched the update filter")]
    NoMatch,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The round-trips a partial update is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    Set,
    Append,
    Remove,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateStep::Set => "$set",
            UpdateStep::Append => "$push",
            UpdateStep::Remove => "$pull",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A multi-step update failed part way. Steps listed in `completed`
    /// were applied and are not rolled back.
    #[error("update step {step} failed after {} completed step(s): {source}", .completed.len())]
    UpdateStep {
        step: UpdateStep,
        completed: Vec<UpdateStep>,
        #[source]
        source: StoreError,
    },

    #[error("password error: {0}")]
    Password(String),
}

/// Coarse classification used by the protocol layer to pick a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Infrastructure,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_)
            | Error::UpdateStep {
                source: StoreError::NoMatch,
                ..
            } => ErrorKind::NotFound,
            Error::Store(_) | Error::UpdateStep { .. } | Error::Password(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(StoreError::Json(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::from(StoreError::NotAnObject).kind(),
            ErrorKind::Infrastructure
        );
        let vanished = Error::UpdateStep {
            step: UpdateStep::Append,
            completed: vec![UpdateStep::Set],
            source: StoreError::NoMatch,
        };
        assert_eq!(vanished.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn update_step_message_names_the_step() {
        let err = Error::UpdateStep {
            step: UpdateStep::Remove,
            completed: vec![UpdateStep::Set, UpdateStep::Append],
            source: StoreError::Poisoned,
        };
        assert_eq!(
            err.to_string(),
            "update step $pull failed after 2 completed step(s): store lock poisoned"
        );
    }

    #[test]
    fn messages_pass_through() {
        assert_eq!(
            Error::NotFound("expense not found".into()).to_string(),
            "expense not found"
        );
    }
}
