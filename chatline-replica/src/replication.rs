//! The idempotent replay handler (spec.md §4.6): applies an original request
//! `R` received on the `replication` topic to local state, the same way
//! `R` was applied when the originating replica first handled it, minus any
//! side-effect fan-out.

use chatline_wire::{names, ChannelRequest, Envelope, LoginRequest, PrivateMessageRequest, PublishRequest};
use chatline_storage::MessageLogEntry;
use indicio::{clue, DEBUG, WARNING};

use crate::error::Error;
use crate::state::ReplicaState;

static COLLECTOR: indicio::Collector = indicio::Collector::new();

pub fn collector() -> &'static indicio::Collector {
    &COLLECTOR
}

/// Apply `request` to `state`'s write log. Writes take [`ReplicaState::lock_writes`]
/// across the whole apply, the same critical section a locally-originated
/// write holds (spec.md §4.6: "All mutations take the same mutex that
/// guards LC and the in-memory maps").
///
/// `login`/`channel` insert only if absent (never overwrite); `publish`/
/// `message` append to the message log unconditionally — duplicates are
/// permitted there (SPEC_FULL.md §9 open question 4).
pub fn apply(state: &ReplicaState, request: &Envelope) -> Result<(), Error> {
    let _guard = state.lock_writes();
    match request.service.as_str() {
        names::LOGIN => {
            let req = LoginRequest::from_envelope(request)?;
            let inserted = state.write_log().insert_user_if_absent(&req.user)?;
            clue!(COLLECTOR, DEBUG, { replay_login: { user: req.user, inserted: inserted } });
            Ok(())
        }
        names::CHANNEL => {
            let req = ChannelRequest::from_envelope(request)?;
            let inserted = state.write_log().insert_channel_if_absent(&req.channel)?;
            clue!(COLLECTOR, DEBUG, { replay_channel: { channel: req.channel, inserted: inserted } });
            Ok(())
        }
        names::PUBLISH => {
            let req = PublishRequest::from_envelope(request)?;
            state.write_log().append_message(MessageLogEntry::ChannelPublish {
                channel: req.channel,
                user: req.user,
                message: req.message,
                timestamp: request.timestamp().to_string(),
                clock: request.clock(),
            })?;
            Ok(())
        }
        names::MESSAGE => {
            let req = PrivateMessageRequest::from_envelope(request)?;
            state.write_log().append_message(MessageLogEntry::PrivateMessage {
                src: req.src,
                dst: req.dst,
                message: req.message,
                timestamp: request.timestamp().to_string(),
                clock: request.clock(),
            })?;
            Ok(())
        }
        other => {
            clue!(COLLECTOR, WARNING, { replay_unknown_service: other.to_string() });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ReplicaId;
    use chatline_storage::InMemoryWriteLog;
    use chatline_transport::inproc::Hub;
    use chatline_transport::Transport;
    use std::sync::Arc;

    fn state() -> Arc<ReplicaState> {
        let hub = Hub::new();
        let publisher = hub.publisher("tcp://*:5555", "r").unwrap();
        ReplicaState::new(ReplicaId::from("r".to_string()), "tcp://r:5570", Arc::new(InMemoryWriteLog::new()), publisher)
    }

    #[test]
    fn login_replay_is_idempotent() {
        let s = state();
        let req = Envelope::new(names::LOGIN, "t", 1).with_field("user", "alice");
        apply(&s, &req).unwrap();
        apply(&s, &req).unwrap();
        assert_eq!(vec!["alice".to_string()], s.write_log().list_users());
    }

    #[test]
    fn publish_replay_permits_duplicates() {
        let log = Arc::new(InMemoryWriteLog::new());
        let hub = Hub::new();
        let publisher = hub.publisher("tcp://*:5555", "r").unwrap();
        let s = ReplicaState::new(ReplicaId::from("r".to_string()), "tcp://r:5570", log.clone(), publisher);
        let req = Envelope::new(names::PUBLISH, "t", 1)
            .with_field("channel", "general")
            .with_field("user", "alice")
            .with_field("message", "hi");
        apply(&s, &req).unwrap();
        apply(&s, &req).unwrap();
        assert_eq!(2, log.messages().len());
    }

    #[test]
    fn unknown_service_on_replication_topic_is_a_no_op() {
        let s = state();
        let req = Envelope::new("bogus", "t", 1);
        assert!(apply(&s, &req).is_ok());
    }
}
