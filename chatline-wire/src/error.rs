use prototk_derive::Message;
use zerror::{iotoz, Z};
use zerror_core::ErrorCore;

use crate::value::{Map, Value};

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// Errors raised while encoding, decoding, or dispatching a wire frame.
///
/// This is the core error type every chatline crate boundary propagates
/// through; per-subsystem errors (`chatline_registry::Error`,
/// `chatline_replica::Error`) convert into it rather than duplicating these
/// variants.
#[derive(Clone, Message, zerror_derive::Z)]
pub enum Error {
    /// The default, only meaningful as a placeholder before a real error is
    /// constructed.
    #[prototk(786432, message)]
    Success {
        #[prototk(1, message)]
        core: ErrorCore,
    },
    /// The frame's binary encoding could not be parsed.
    #[prototk(786433, message)]
    DecodeFailure {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
    /// A request named a service outside the closed set in spec.md §6.
    #[prototk(786434, message)]
    UnknownService {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        service: String,
    },
    /// A request's `data` map was missing a required field, or a field had
    /// the wrong shape.
    #[prototk(786435, message)]
    MissingField {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        field: String,
    },
    /// A write conflicted with existing state (duplicate user/channel name).
    #[prototk(786436, message)]
    AlreadyExists {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
    /// A request named a user or channel this replica has no record of.
    #[prototk(786437, message)]
    NotFound {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
    /// The replica or registry is not registered / not ranked yet.
    #[prototk(786438, message)]
    NotRegistered {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
    /// The underlying transport failed (socket closed, timed out, etc).
    #[prototk(786439, message)]
    TransportFailure {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
    /// Coordination failed: registry unreachable, coordinator unknown.
    #[prototk(786440, message)]
    CoordinationFailure {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
}

impl Default for Error {
    fn default() -> Self {
        Self::Success {
            core: ErrorCore::default(),
        }
    }
}

impl Error {
    pub fn decode_failure(what: impl Into<String>) -> Self {
        Self::DecodeFailure {
            core: ErrorCore::default(),
            what: what.into(),
        }
    }

    pub fn unknown_service(service: impl Into<String>) -> Self {
        Self::UnknownService {
            core: ErrorCore::default(),
            service: service.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            core: ErrorCore::default(),
            field: field.into(),
        }
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists {
            core: ErrorCore::default(),
            what: what.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            core: ErrorCore::default(),
            what: what.into(),
        }
    }

    pub fn not_registered(what: impl Into<String>) -> Self {
        Self::NotRegistered {
            core: ErrorCore::default(),
            what: what.into(),
        }
    }

    pub fn transport_failure(what: impl Into<String>) -> Self {
        Self::TransportFailure {
            core: ErrorCore::default(),
            what: what.into(),
        }
    }

    pub fn coordination_failure(what: impl Into<String>) -> Self {
        Self::CoordinationFailure {
            core: ErrorCore::default(),
            what: what.into(),
        }
    }

    /// A short, human-readable description suitable for `data.description` on
    /// an `erro` service reply.
    pub fn description(&self) -> String {
        match self {
            Error::Success { .. } => "success".to_string(),
            Error::DecodeFailure { what, .. } => format!("malformed request: {what}"),
            Error::UnknownService { service, .. } => format!("unknown service: {service}"),
            Error::MissingField { field, .. } => format!("missing required field: {field}"),
            Error::AlreadyExists { what, .. } => format!("{what} already exists"),
            Error::NotFound { what, .. } => format!("{what} not found"),
            Error::NotRegistered { what, .. } => what.clone(),
            Error::TransportFailure { what, .. } => format!("transport failure: {what}"),
            Error::CoordinationFailure { what, .. } => format!("coordination failure: {what}"),
        }
    }
}

impl From<buffertk::Error> for Error {
    fn from(err: buffertk::Error) -> Error {
        Error::DecodeFailure {
            core: ErrorCore::default(),
            what: format!("{err:?}"),
        }
    }
}

impl From<prototk::Error> for Error {
    fn from(err: prototk::Error) -> Error {
        Error::DecodeFailure {
            core: ErrorCore::default(),
            what: format!("{err:?}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::TransportFailure {
            core: ErrorCore::default(),
            what: err.to_string(),
        }
    }
}

iotoz! {Error}

impl From<Error> for Value {
    fn from(err: Error) -> Self {
        Map::new()
            .with("status", "erro")
            .with("description", err.description())
            .into()
    }
}
