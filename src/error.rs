//! Error types for certificate checking.
//!
//! Every failure a check can hit is a [`CheckError`]. Workers never let one
//! escape; it is always carried inside a [`crate::CheckResult`].

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::store::{DomainId, UserId};

/// Why a candidate hostname was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostnameError {
    /// Empty or whitespace-only input
    #[error("hostname cannot be empty")]
    Empty,

    /// Longer than the 253 octets DNS allows
    #[error("hostname too long ({len} > 253)")]
    TooLong {
        /// Length of the rejected input
        len: usize,
    },

    /// Violates the label grammar
    #[error("invalid hostname: {reason}")]
    InvalidFormat {
        /// Which rule was broken
        reason: String,
    },
}

impl HostnameError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

/// Error produced while checking one host's certificate.
///
/// I/O sources sit behind an `Arc` so results can be cloned and handed to
/// several consumers.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    /// The hostname failed validation; no network activity happened
    #[error("invalid hostname {hostname:?}: {source}")]
    InvalidHostname {
        /// The rejected input
        hostname: String,
        /// The rule it broke
        #[source]
        source: HostnameError,
    },

    /// DNS lookup failed or returned no addresses
    #[error("could not resolve {hostname}: {source}")]
    Resolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        #[source]
        source: Arc<io::Error>,
    },

    /// TCP dial failed (refused, unreachable, timed out)
    #[error("failed to connect to {address}: {source}")]
    Connection {
        /// The `host:port` that was dialled
        address: String,
        /// The underlying I/O error
        #[source]
        source: Arc<io::Error>,
    },

    /// TLS negotiation failed
    #[error("TLS handshake failed for {hostname}: {details}")]
    Handshake {
        /// The hostname sent as SNI
        hostname: String,
        /// What went wrong
        details: String,
    },

    /// Handshake completed but the peer presented no certificate
    #[error("no certificates found for {hostname}")]
    NoCertificate {
        /// The hostname that was checked
        hostname: String,
    },

    /// The peer's leaf certificate could not be interpreted
    #[error("unusable certificate from {hostname}: {details}")]
    InvalidCertificate {
        /// The hostname that was checked
        hostname: String,
        /// What could not be read
        details: String,
    },

    /// The check was aborted by its deadline or by pool shutdown
    #[error("certificate check cancelled")]
    Cancelled,

    /// OpenSSL failed while setting up the client
    #[error("OpenSSL error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
}

impl CheckError {
    pub(crate) fn connection(address: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            address: address.into(),
            source: Arc::new(source),
        }
    }

    /// Whether the error happened before any network activity.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidHostname { .. })
    }
}

/// Error returned by a [`crate::store::DomainStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No domain with this id
    #[error("domain with ID {0} not found")]
    NotFound(DomainId),

    /// The owner already tracks this name
    #[error("domain {name} already exists for user {user_id}")]
    Duplicate {
        /// Owner of the existing record
        user_id: UserId,
        /// The duplicated name
        name: String,
    },

    /// User id zero is reserved
    #[error("user ID cannot be zero")]
    InvalidUser,
}

/// Error returned by [`crate::monitor::DomainMonitor`] operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The name was rejected before it was stored
    #[error(transparent)]
    Check(#[from] CheckError),

    /// The store refused the operation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The service is not accepting work
    #[error("certificate service is not running")]
    NotRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckError::InvalidHostname {
            hostname: String::new(),
            source: HostnameError::Empty,
        };
        assert_eq!(
            err.to_string(),
            "invalid hostname \"\": hostname cannot be empty"
        );
    }

    #[test]
    fn test_connection_error_keeps_source() {
        let err = CheckError::connection(
            "example.com:443",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "refused");
        assert!(err.to_string().contains("example.com:443"));
    }

    #[test]
    fn test_errors_are_clone() {
        let err = CheckError::NoCertificate {
            hostname: "example.com".to_string(),
        };
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_invalid_certificate_names_host() {
        let err = CheckError::InvalidCertificate {
            hostname: "example.com".to_string(),
            details: "expiry out of range".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unusable certificate from example.com: expiry out of range"
        );
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::NotFound(DomainId(7)).to_string(),
            "domain with ID 7 not found"
        );
    }
}
