use crate::config::TableConfigBuilderError;

/// Errors raised while building a table. The hot path has none.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid table configuration: {0}")]
    Config(#[from] TableConfigBuilderError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
