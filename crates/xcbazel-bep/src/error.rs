//! Error types for build event parsing.

use thiserror::Error;

/// Errors decoding a single line of the event stream.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("build event is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("cannot canonicalize build event id: {0}")]
    Canonicalize(String),
}

/// Recoverable problems found while attaching an event to the tree.
///
/// The event is dropped from the tree structure but the stream keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeWarning {
    #[error("build event {event} does not have an id")]
    MissingId { event: String },

    #[error("unable to find parent for build event {id}")]
    OrphanEvent { id: String },
}
