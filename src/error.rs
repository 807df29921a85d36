use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] io::Error),
    #[error("{0}")]
    Usage(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Semantic(String),
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),
    #[error("unrecognized instruction '{0}'")]
    UnknownOpcode(String),
    #[error("'{0}' is missing an operand")]
    MissingOperand(String),
    #[error("invalid operand '{token}': {reason}")]
    InvalidOperand { token: String, reason: String },
    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("register allocation failed: no free or evictable register")]
    RegisterExhaustion,
    #[error("out of memory: requested {requested} words, largest free block is {largest}")]
    OutOfMemory { requested: usize, largest: usize },
    #[error("free of unknown address {0}")]
    UnknownAddress(usize),
    #[error("unsupported shape: {0}")]
    UnsupportedShape(String),
    #[error("mismatched shapes: {0}")]
    MismatchedShape(String),
    #[error("{0}")]
    Runtime(String),
}

impl Error {
    pub fn invalid_operand(token: &str, reason: &str) -> Self {
        Error::InvalidOperand {
            token: token.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attaches a source line number, keeping the innermost one.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            e @ Error::AtLine { .. } => e,
            e => Error::AtLine {
                line,
                source: Box::new(e),
            },
        }
    }
}
