//! Error types for the crosscheck data model

use thiserror::Error;

use crate::types::EntityKind;

/// Result type alias using the model Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building references and specs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Entity id must not be empty")]
    EmptyId,

    #[error("Invalid parent for {kind}: expected {}, got {}", describe(.expected), describe(.actual))]
    InvalidParent {
        kind: EntityKind,
        expected: Option<EntityKind>,
        actual: Option<EntityKind>,
    },

    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),
}

fn describe(kind: &Option<EntityKind>) -> String {
    match kind {
        Some(kind) => kind.to_string(),
        None => "no parent".to_string(),
    }
}
