use thiserror::Error;

use crate::parse::ParseError;
use crate::{CommitError, GrammarError};

/// Unified error type covering grammar text, grammar changes, and I/O.
///
/// Returned by convenience methods like
/// [`GrammarManager::load_jsgf()`](crate::GrammarManager::load_jsgf) and
/// [`GrammarManager::load_jsgf_file()`](crate::GrammarManager::load_jsgf_file).
#[derive(Debug, Error)]
pub enum RulegramError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}
