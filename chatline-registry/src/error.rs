use zerror_core::ErrorCore;

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors raised while the Registry handles a request. Wraps the two
/// collaborator errors it can see (a malformed/unknown request, or a
/// transport failure) rather than duplicating their variants (SPEC_FULL.md
/// §7).
#[derive(Clone, zerror_derive::Z)]
pub enum Error {
    Wire {
        core: ErrorCore,
        inner: chatline_wire::Error,
    },
    Transport {
        core: ErrorCore,
        inner: chatline_transport::Error,
    },
}

impl Error {
    pub fn description(&self) -> String {
        match self {
            Error::Wire { inner, .. } => inner.description(),
            Error::Transport { .. } => "registry transport failure".to_string(),
        }
    }
}

impl From<chatline_wire::Error> for Error {
    fn from(inner: chatline_wire::Error) -> Self {
        Error::Wire {
            core: ErrorCore::default(),
            inner,
        }
    }
}

impl From<chatline_transport::Error> for Error {
    fn from(inner: chatline_transport::Error) -> Self {
        Error::Transport {
            core: ErrorCore::default(),
            inner,
        }
    }
}
