use thiserror::Error;

use crate::episode::CompileError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Pattern(#[from] CompileError),

    #[error("planned {actual} renames for {expected} matched pairs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("{first} and {second} would both be renamed to {target}")]
    Collision {
        target: String,
        first: String,
        second: String,
    },

    #[error("could not infer title: {0}")]
    InferTitle(String),

    #[error("classifier failed: {0}")]
    Classifier(String),

    #[error("search failed: {0}")]
    Search(String),

    #[error("settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
