// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for pin protocol operations.
//!
//! Every fallible call on a pin, filter, pool or codec adapter reports one of
//! the variants below. Some of them are transient ("not handled, try later")
//! and are returned to the caller without any internal retry; see
//! [`Error::is_transient`].

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur while negotiating, streaming or changing state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pin has no peer.
    #[error("Pin is not connected")]
    NotConnected,

    /// The pin already has a peer; disconnect first.
    #[error("Pin is already connected")]
    AlreadyConnected,

    /// The operation is not legal in the current filter state
    /// (for example connecting while running, or receiving while stopped).
    #[error("Wrong state: {0}")]
    WrongState(&'static str),

    /// Neither the proposed format nor any preferred format was accepted by both sides.
    #[error("No acceptable format")]
    NoAcceptableFormat,

    /// A non-blocking acquire found every pool buffer leased, or a payload
    /// does not fit the negotiated buffer size.
    #[error("Pool exhausted")]
    PoolExhausted,

    /// Buffer storage could not be provided for the negotiated properties.
    #[error("Out of memory")]
    OutOfMemory,

    /// The pool is decommitted; acquisitions fail until it is committed again.
    #[error("Pool not committed")]
    NotCommitted,

    /// A bounded wait (thread join, pool decommit) expired. Fatal for the pin.
    #[error("Timeout while waiting for {0}")]
    Timeout(String),

    /// Opaque failure surfaced from a codec collaborator. Fatal for the pin.
    #[error("Codec failure: {0}")]
    Codec(String),

    /// Data arrived after end-of-stream was signalled.
    #[error("Sample rejected after end-of-stream")]
    RejectedEos,

    /// Data arrived while the pin is flushing. Transient.
    #[error("Sample rejected while flushing")]
    RejectedFlushing,

    /// Delivery on this connection has stopped after a downstream failure
    /// or a codec failure.
    #[error("Delivery halted")]
    DeliveryHalted,

    /// An argument violated the call contract (empty buffer, bad channel count, ...).
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// A generic error for failures not covered by the variants above.
    #[error("Other error: {0}")]
    Other(String),

    /// Failed to parse or produce a JSON configuration document.
    #[error("Json: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure while writing to a side sink.
    #[error("Io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for outcomes that mean "not handled, try later".
    ///
    /// These are never retried internally; the caller decides.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RejectedFlushing | Error::PoolExhausted)
    }

    /// Returns `true` for outcomes that end delivery on the affected pin.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Codec(_))
    }

    /// Builds an [`Error::Other`] describing a poisoned lock.
    pub(crate) fn poisoned(what: &str) -> Error {
        Error::Other(format!("Failed to lock {what}: lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_fatal_are_disjoint() {
        let all = [
            Error::NotConnected,
            Error::AlreadyConnected,
            Error::WrongState("stopped"),
            Error::NoAcceptableFormat,
            Error::PoolExhausted,
            Error::OutOfMemory,
            Error::NotCommitted,
            Error::Timeout("pump".to_string()),
            Error::Codec("bad packet".to_string()),
            Error::RejectedEos,
            Error::RejectedFlushing,
            Error::DeliveryHalted,
            Error::InvalidArg("x".to_string()),
        ];
        for err in &all {
            assert!(!(err.is_transient() && err.is_fatal()), "{err}");
        }
        assert!(Error::RejectedFlushing.is_transient());
        assert!(Error::Timeout("join".into()).is_fatal());
    }
}
