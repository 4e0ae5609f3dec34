use zerror_core::ErrorCore;

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors raised inside a replica's request pipeline, P2P listener, or
/// heartbeat/election driver. Wraps the collaborator errors it can see
/// rather than duplicating their variants (SPEC_FULL.md §7).
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
    /// Clock sync or election could not proceed because the coordinator's
    /// endpoint is not (yet) known (spec.md §7 "coordination error").
    CoordinatorUnknown {
        core: ErrorCore,
    },
}

impl Error {
    pub fn coordinator_unknown() -> Self {
        Error::CoordinatorUnknown {
            core: ErrorCore::default(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Error::Wire { inner, .. } => inner.description(),
            Error::Transport { .. } => "replica transport failure".to_string(),
            Error::CoordinatorUnknown { .. } => "coordinator endpoint unknown".to_string(),
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
