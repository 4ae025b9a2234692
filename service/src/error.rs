//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Result type used throughout the connection engine
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Errors surfaced by connections, acceptors, connectors and servers
///
/// The error is cheap to clone so that a single outcome can be replayed to
/// every subscriber of a coalesced operation such as `close`.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The codec failed to encode or decode an item
    #[error("Codec error: {0}")]
    Codec(String),

    /// The connection is closing or closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The content stream already accepted its single subscriber
    #[error("Content stream already has a subscriber")]
    AlreadySubscribed,

    /// A write source failed before completing
    #[error("Write source failed: {0}")]
    Source(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Lifecycle misuse, such as starting a server twice
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl ConnectionError {
    /// Misuse of the connection protocol by the caller
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ConnectionError::AlreadySubscribed
                | ConnectionError::ConnectionClosed
                | ConnectionError::Codec(_)
        )
    }

    /// Failure reported by the transport or by a write source
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_) | ConnectionError::Source(_) | ConnectionError::Timeout
        )
    }

    /// Lifecycle misuse of a server or client
    pub fn is_lifecycle_misuse(&self) -> bool {
        matches!(self, ConnectionError::IllegalState(_))
    }

    /// Kind of the wrapped I/O error, if any
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ConnectionError::Io(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}

impl From<LinesCodecError> for ConnectionError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(err) => err.into(),
            other => ConnectionError::Codec(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert!(ConnectionError::AlreadySubscribed.is_protocol_violation());
        assert!(ConnectionError::ConnectionClosed.is_protocol_violation());
        assert!(!ConnectionError::ConnectionClosed.is_transport_failure());
        assert!(ConnectionError::Source("boom".into()).is_transport_failure());
        assert!(ConnectionError::IllegalState("twice".into()).is_lifecycle_misuse());
        assert!(!ConnectionError::Timeout.is_lifecycle_misuse());
    }

    #[test]
    fn test_io_conversion() {
        let err: ConnectionError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(err.is_transport_failure());
        assert_eq!(err.io_kind(), Some(io::ErrorKind::BrokenPipe));

        let cloned = err.clone();
        assert_eq!(cloned.io_kind(), Some(io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_lines_codec_conversion() {
        let err: ConnectionError = LinesCodecError::MaxLineLengthExceeded.into();
        assert!(matches!(err, ConnectionError::Codec(_)));

        let err: ConnectionError =
            LinesCodecError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).into();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConnectionError::ConnectionClosed.to_string(),
            "Connection closed"
        );
        assert_eq!(
            ConnectionError::IllegalState("server already started".into()).to_string(),
            "Illegal state: server already started"
        );
    }
}
