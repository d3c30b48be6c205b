pub mod align;
pub mod bangumi;
pub mod episode;
pub mod error;
pub mod infer;
pub mod llm;
pub mod logging;
pub mod merge;
pub mod plan;
pub mod rename;
pub mod settings;
pub mod video;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
