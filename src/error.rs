//! Failure taxonomy for query translation.
//!
//! Every variant aborts translation of the current query. None of them are
//! retryable: the compiler performs no I/O, so a failure always means the
//! input uses a construct we cannot translate or a converter broke one of
//! its own shape contracts.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    /// No converter claims the node, or the operator/method has no SQL
    /// translation.
    #[error("{construct} is not supported")]
    Unsupported { construct: String },

    /// A converter received a child that converted to the wrong kind of
    /// SQL node.
    #[error("expected {expected} but {context} converted to {actual}")]
    ShapeContract {
        expected: &'static str,
        actual: &'static str,
        context: String,
    },

    #[error("{context}: expected {expected} but found {actual}")]
    Arity {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("no binding for '{member}' in {context}")]
    MissingBinding { member: String, context: String },

    #[error("lambda parameter '{0}' is not bound to a data source")]
    UnboundParameter(String),

    #[error("entity '{entity}' has no column member '{member}'")]
    UnknownMember { entity: String, member: String },

    #[error("entity '{entity}' has no navigation '{navigation}'")]
    UnknownNavigation { entity: String, navigation: String },

    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),

    /// Compiler-internal invariant violation.
    #[error("invalid translator state: {0}")]
    InvalidState(String),

    #[error("model configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TranslateError>;

impl TranslateError {
    pub fn unsupported(construct: impl fmt::Display) -> Self {
        Self::Unsupported {
            construct: construct.to_string(),
        }
    }

    pub fn shape(expected: &'static str, actual: &'static str, context: impl fmt::Display) -> Self {
        Self::ShapeContract {
            expected,
            actual,
            context: context.to_string(),
        }
    }

    pub fn invalid(message: impl fmt::Display) -> Self {
        Self::InvalidState(message.to_string())
    }
}
