//! Client error taxonomy
//!
//! Callers classify errors through the predicate methods rather than by
//! matching variants, so the set can grow without breaking them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration value in field {field:?}: {reason}")]
    InvalidConfiguration {
        field: &'static str,
        reason: String,
    },
    #[error("cannot establish connection: {0}")]
    ConnectionEstablishing(#[source] std::io::Error),
    #[error("authentication failed: {0}")]
    Authenticate(#[source] Box<Error>),
    #[error("database selection failed: {0}")]
    SelectDatabase(#[source] Box<Error>),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("cannot communicate with server: {0}")]
    ConnectionBroken(String),
    #[error("all {0} configured connections in use")]
    PoolLimitReached(usize),
    #[error("server responded error: {0}")]
    ServerResponse(String),
    #[error("timeout waiting for the response after command {0:?}")]
    Timeout(String),
    #[error("invalid server response: {0}")]
    InvalidResponse(String),
    #[error("command {0:?} requires a subscription")]
    UseSubscription(String),
    #[error("unexpected request: {0:?}")]
    UnexpectedRequest(String),
    #[error("invalid type conversion of {value:?} to {target:?}")]
    InvalidType {
        value: String,
        target: &'static str,
    },
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("item index {index} is illegal for result set size {len}")]
    IllegalItemIndex { index: usize, len: usize },
    #[error("item at index {index} is no {expected}")]
    IllegalItemType {
        index: usize,
        expected: &'static str,
    },
}

impl Error {
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Error::InvalidConfiguration { .. })
    }

    /// Dial, authentication and database selection failures.
    pub fn is_connection_establishing(&self) -> bool {
        matches!(
            self,
            Error::ConnectionEstablishing(_) | Error::Authenticate(_) | Error::SelectDatabase(_)
        )
    }

    pub fn is_connection_broken(&self) -> bool {
        matches!(self, Error::ConnectionBroken(_))
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }

    pub fn is_pool_limit_reached(&self) -> bool {
        matches!(self, Error::PoolLimitReached(_))
    }

    pub fn is_server_response(&self) -> bool {
        matches!(self, Error::ServerResponse(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_invalid_response(&self) -> bool {
        matches!(self, Error::InvalidResponse(_))
    }

    pub fn is_use_subscription(&self) -> bool {
        matches!(self, Error::UseSubscription(_))
    }

    pub fn is_unexpected_request(&self) -> bool {
        matches!(self, Error::UnexpectedRequest(_))
    }

    pub fn is_invalid_type(&self) -> bool {
        matches!(self, Error::InvalidType { .. })
    }

    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Error::InvalidKey(_))
    }

    pub fn is_illegal_item_index(&self) -> bool {
        matches!(self, Error::IllegalItemIndex { .. })
    }

    pub fn is_illegal_item_type(&self) -> bool {
        matches!(self, Error::IllegalItemType { .. })
    }
}
