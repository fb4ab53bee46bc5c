use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("no such object in database: {0}")]
    NotFound(String),

    #[error("more than one match for {0}; scoped-key uniqueness is broken")]
    DuplicateFound(String),

    #[error("uniqueness constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("illegal task state transition: {from} -> {to}")]
    StateTransition { from: TaskStatus, to: TaskStatus },

    #[error("task {task} does not perform a transformation in the network of taskhub {taskhub}")]
    Membership { task: String, taskhub: String },

    #[error("stored object is malformed: {0}")]
    Codec(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<neo4rs::Error> for StateError {
    fn from(e: neo4rs::Error) -> Self {
        let msg = e.to_string();
        // the driver reports server failures by code string only
        if msg.contains("ConstraintValidation") || msg.contains("ConstraintViolation") {
            StateError::ConstraintViolation(msg)
        } else {
            StateError::Storage(msg)
        }
    }
}

impl From<neo4rs::DeError> for StateError {
    fn from(e: neo4rs::DeError) -> Self {
        StateError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Codec(e.to_string())
    }
}
