use zerror_core::ErrorCore;

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors raised by a [`crate::Transport`] and the sockets it hands out.
///
/// This is deliberately small: the transport boundary only needs to report
/// "the other end is gone" and "nothing arrived before the deadline" to the
/// coordination core above it.
#[derive(Clone, zerror_derive::Z)]
pub enum Error {
    /// The endpoint named in a `bind`/`connect` call has no peer listening
    /// (inproc) or could not be reached (a real transport).
    Unreachable {
        core: ErrorCore,
        endpoint: String,
    },
    /// No frame arrived before the caller's deadline elapsed.
    Timeout {
        core: ErrorCore,
    },
    /// The socket was closed, locally or by the peer, mid-operation.
    Closed {
        core: ErrorCore,
    },
}

impl Error {
    pub fn unreachable(endpoint: impl Into<String>) -> Self {
        Self::Unreachable {
            core: ErrorCore::default(),
            endpoint: endpoint.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::Timeout {
            core: ErrorCore::default(),
        }
    }

    pub fn closed() -> Self {
        Self::Closed {
            core: ErrorCore::default(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
