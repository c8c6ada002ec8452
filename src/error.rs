//! Error types for coupler operations.

use thiserror::Error;

use crate::condition::{Condition, ConditionKind};
use crate::transport::TransportError;

/// Result type alias for coupler operations.
pub type Result<T> = std::result::Result<T, CouplerError>;

/// Errors returned by [`Coupler`](crate::Coupler) operations.
///
/// Every `Condition` error has also been delivered to the condition
/// handler before it is returned.
#[derive(Debug, Error)]
pub enum CouplerError {
    /// The operation failed with a condition from the coupler taxonomy.
    #[error("{0}")]
    Condition(Condition),

    /// The host could not be reached or never answered the handshake.
    #[error("Cannot reach {host}:{port}")]
    Connection {
        /// Host passed to `connect`.
        host: String,
        /// Port passed to `connect`.
        port: u16,
        /// Underlying transport failure, if any.
        #[source]
        source: Option<TransportError>,
    },

    /// `connect` was called on a live connection.
    #[error("Already connected")]
    AlreadyConnected,
}

impl CouplerError {
    /// Creates a `Connection` error.
    ///
    /// # Example
    ///
    /// ```
    /// use coupler_io::CouplerError;
    ///
    /// let err = CouplerError::connection("192.168.100.1", 502, None);
    /// assert_eq!(err.to_string(), "Cannot reach 192.168.100.1:502");
    /// ```
    pub fn connection(host: impl Into<String>, port: u16, source: Option<TransportError>) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            source,
        }
    }

    /// Returns the condition kind if this is a `Condition` error.
    ///
    /// # Example
    ///
    /// ```
    /// use coupler_io::{Condition, ConditionKind, CouplerError};
    ///
    /// let err = CouplerError::from(Condition::new(ConditionKind::InvalidModuleIndex));
    /// assert_eq!(err.kind(), Some(ConditionKind::InvalidModuleIndex));
    /// ```
    pub fn kind(&self) -> Option<ConditionKind> {
        match self {
            Self::Condition(condition) => Some(condition.kind),
            _ => None,
        }
    }
}

impl From<Condition> for CouplerError {
    fn from(condition: Condition) -> Self {
        Self::Condition(condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_condition_display() {
        let err = CouplerError::from(Condition::new(ConditionKind::Timeout));
        assert_eq!(err.to_string(), "[2] timeout");
        assert_eq!(err.kind(), Some(ConditionKind::Timeout));
    }

    #[test]
    fn test_connection_source() {
        let err = CouplerError::connection("10.0.0.1", 502, Some(TransportError::Timeout));
        assert!(err.source().is_some());
        assert_eq!(err.kind(), None);

        let err = CouplerError::connection("10.0.0.1", 502, None);
        assert!(err.source().is_none());
    }

    #[test]
    fn test_already_connected_display() {
        assert_eq!(CouplerError::AlreadyConnected.to_string(), "Already connected");
    }
}
