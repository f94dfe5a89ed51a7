//! Common `Error` and `Result` types for the library and the command line tool.
use crate::config::ConfigError;
use crate::trace::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file error: {0}")]
    Config(#[from] ConfigError),

    #[error("line {line}: {source}")]
    Parse {
        line: u64,
        #[source]
        source: ParseError,
    },

    #[error("connection {0} cannot be packed into a 64-bit id")]
    Unpackable(String),

    #[error("invalid log level: {0}")]
    LogLevel(String),
}

pub type Result<T> = std::result::Result<T, Error>;
