use thiserror::Error;

/// Crate-wide error type.
///
/// Variants map onto the error taxonomy the dispatcher and event loop rely
/// on to decide how to react: protocol/command errors become a RESP `Error`
/// reply on the offending connection, `Io` destroys the connection, and
/// startup failures propagate out of `main`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ERR Protocol error: {0}")]
    Protocol(String),
    #[error("ERR wrong number of arguments for '{0}'")]
    WrongArity(String),
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR unknown subcommand '{0}'")]
    UnknownSubcommand(String),
    #[error("ERR unknown configuration parameter '{0}'")]
    UnknownConfigParam(String),
    #[error("ERR unsupported option '{0}'")]
    UnknownOption(String),
    #[error("ERR invalid expire time in 'set' command")]
    InvalidExpireTime,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR syntax error")]
    SyntaxError,
}

pub type Result<T> = std::result::Result<T, Error>;
