//! The replica request pipeline (spec.md §4.2): decode, advance the Lamport
//! clock, maybe schedule a clock-sync attempt, dispatch to a service
//! handler, replicate and fan out on success, and encode the reply.

use std::sync::Arc;

use biometrics::Counter;
use chatline_storage::MessageLogEntry;
use chatline_transport::Transport;
use chatline_wire::{
    names, topics, ChannelRequest, Envelope, LoginRequest, NamesResponse, PrivateMessageRequest, PublishRequest, Status,
};
use indicio::{clue, DEBUG, WARNING};

use crate::clocksync;
use crate::ephemeral::EphemeralPool;
use crate::state::ReplicaState;

static COLLECTOR: indicio::Collector = indicio::Collector::new();

pub fn collector() -> &'static indicio::Collector {
    &COLLECTOR
}

static REQUESTS_HANDLED: Counter = Counter::new("chatline_replica.pipeline.requests_handled");
static DECODE_FAILURES: Counter = Counter::new("chatline_replica.pipeline.decode_failures");
static WRITES_REPLICATED: Counter = Counter::new("chatline_replica.pipeline.writes_replicated");
static CLOCK_SYNC_SCHEDULED: Counter = Counter::new("chatline_replica.pipeline.clock_sync_scheduled");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&REQUESTS_HANDLED);
    collector.register_counter(&DECODE_FAILURES);
    collector.register_counter(&WRITES_REPLICATED);
    collector.register_counter(&CLOCK_SYNC_SCHEDULED);
}

/// Owns what the main REP loop needs beyond [`ReplicaState`] itself: a
/// transport handle (to schedule clock-sync RPCs to the coordinator) and
/// the bounded worker pool ephemeral tasks run on.
pub struct Pipeline {
    state: Arc<ReplicaState>,
    transport: Arc<dyn Transport>,
    pool: Arc<EphemeralPool>,
}

impl Pipeline {
    pub fn new(state: Arc<ReplicaState>, transport: Arc<dyn Transport>, pool: Arc<EphemeralPool>) -> Self {
        Self { state, transport, pool }
    }

    /// Service one client request end to end. Never fails: decode and
    /// protocol errors become an `erro` reply (spec.md §7).
    pub fn handle(&self, payload: &[u8]) -> Vec<u8> {
        REQUESTS_HANDLED.click();
        let envelope = match chatline_wire::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                DECODE_FAILURES.click();
                let timestamp = chatline_wire::now_rfc3339();
                let clock = self.state.clock.tick();
                return chatline_wire::encode(&Envelope::erro(timestamp, clock, e.description()));
            }
        };

        // spec.md §4.2 step 2: "Update LC = max(LC, incoming.clock) under
        // the mutex."
        self.state.clock.observe(envelope.clock());

        // spec.md §4.2 step 3: "Increment the message counter MC; if MC ≥
        // MSG_COUNT_TRIGGER and this replica is not the coordinator,
        // schedule a non-blocking clock-sync task."
        if self.state.bump_message_counter() && !self.state.is_coordinator() {
            CLOCK_SYNC_SCHEDULED.click();
            let state = self.state.clone();
            let transport = self.transport.clone();
            self.pool.spawn(move || clocksync::run(&state, transport.as_ref()));
        }

        // spec.md §4.2 step 4: "Increment LC under the mutex; the stamp
        // obtained is outgoing.clock."
        let clock = self.state.clock.tick();
        let timestamp = chatline_wire::now_rfc3339();
        let reply = self.dispatch(&envelope, &timestamp, clock);
        chatline_wire::encode(&reply)
    }

    fn dispatch(&self, request: &Envelope, timestamp: &str, clock: u64) -> Envelope {
        match request.service.as_str() {
            names::LOGIN => self.handle_login(request, timestamp, clock),
            names::CHANNEL => self.handle_channel(request, timestamp, clock),
            names::PUBLISH => self.handle_publish(request, timestamp, clock),
            names::MESSAGE => self.handle_message(request, timestamp, clock),
            names::USERS => {
                let users = self.state.write_log().list_users();
                NamesResponse { names: users }.apply_to(Envelope::new(names::USERS, timestamp, clock), "users")
            }
            names::CHANNELS => {
                let channels = self.state.write_log().list_channels();
                NamesResponse { names: channels }.apply_to(Envelope::new(names::CHANNELS, timestamp, clock), "channels")
            }
            other => Envelope::erro(timestamp, clock, format!("unknown service: {other}")),
        }
    }

    fn handle_login(&self, request: &Envelope, timestamp: &str, clock: u64) -> Envelope {
        let req = match LoginRequest::from_envelope(request) {
            Ok(req) => req,
            Err(e) => return Envelope::erro(timestamp, clock, e.description()),
        };
        // spec.md §5: "a write handler holds the mutex across the insert +
        // save + replicate emit sequence."
        let _guard = self.state.lock_writes();
        let inserted = match self.state.write_log().insert_user_if_absent(&req.user) {
            Ok(inserted) => inserted,
            Err(e) => return Envelope::erro(timestamp, clock, e.description()),
        };
        if !inserted {
            return Status::Erro(format!("{} already exists", req.user)).apply_to(Envelope::new(names::LOGIN, timestamp, clock));
        }
        self.emit_replication(LoginRequest { user: req.user.clone() }.apply_to(Envelope::new(names::LOGIN, timestamp, clock)));
        Status::Ok
            .apply_to(Envelope::new(names::LOGIN, timestamp, clock))
            .with_field("user", req.user)
    }

    fn handle_channel(&self, request: &Envelope, timestamp: &str, clock: u64) -> Envelope {
        let req = match ChannelRequest::from_envelope(request) {
            Ok(req) => req,
            Err(e) => return Envelope::erro(timestamp, clock, e.description()),
        };
        let _guard = self.state.lock_writes();
        let inserted = match self.state.write_log().insert_channel_if_absent(&req.channel) {
            Ok(inserted) => inserted,
            Err(e) => return Envelope::erro(timestamp, clock, e.description()),
        };
        if !inserted {
            return Status::Erro(format!("{} already exists", req.channel)).apply_to(Envelope::new(names::CHANNEL, timestamp, clock));
        }
        self.emit_replication(ChannelRequest { channel: req.channel.clone() }.apply_to(Envelope::new(names::CHANNEL, timestamp, clock)));
        Status::Ok
            .apply_to(Envelope::new(names::CHANNEL, timestamp, clock))
            .with_field("channel", req.channel)
    }

    fn handle_publish(&self, request: &Envelope, timestamp: &str, clock: u64) -> Envelope {
        let req = match PublishRequest::from_envelope(request) {
            Ok(req) => req,
            Err(e) => return Envelope::erro(timestamp, clock, e.description()),
        };
        let _guard = self.state.lock_writes();
        if !self.state.write_log().list_channels().iter().any(|c| c == &req.channel) {
            return Envelope::erro(timestamp, clock, format!("{} not found", req.channel));
        }
        let entry = MessageLogEntry::ChannelPublish {
            channel: req.channel.clone(),
            user: req.user.clone(),
            message: req.message.clone(),
            timestamp: timestamp.to_string(),
            clock,
        };
        if let Err(e) = self.state.write_log().append_message(entry) {
            return Envelope::erro(timestamp, clock, e.description());
        }
        self.emit_replication(
            PublishRequest {
                channel: req.channel.clone(),
                user: req.user.clone(),
                message: req.message.clone(),
            }
            .apply_to(Envelope::new(names::PUBLISH, timestamp, clock)),
        );
        // spec.md §4.2 step 6: "topic is the channel name ... for channel
        // messages."
        let chat_frame = Envelope::new(names::PUBLISH, timestamp, clock)
            .with_field("user", req.user.clone())
            .with_field("message", req.message.clone());
        if let Err(e) = self.state.publish(&req.channel, chatline_wire::encode(&chat_frame)) {
            clue!(COLLECTOR, WARNING, { chat_fanout_failed: e.description() });
        }
        Status::Ok.apply_to(Envelope::new(names::PUBLISH, timestamp, clock))
    }

    fn handle_message(&self, request: &Envelope, timestamp: &str, clock: u64) -> Envelope {
        let req = match PrivateMessageRequest::from_envelope(request) {
            Ok(req) => req,
            Err(e) => return Envelope::erro(timestamp, clock, e.description()),
        };
        let _guard = self.state.lock_writes();
        if !self.state.write_log().list_users().iter().any(|u| u == &req.dst) {
            return Envelope::erro(timestamp, clock, format!("{} not found", req.dst));
        }
        let entry = MessageLogEntry::PrivateMessage {
            src: req.src.clone(),
            dst: req.dst.clone(),
            message: req.message.clone(),
            timestamp: timestamp.to_string(),
            clock,
        };
        if let Err(e) = self.state.write_log().append_message(entry) {
            return Envelope::erro(timestamp, clock, e.description());
        }
        self.emit_replication(
            PrivateMessageRequest {
                dst: req.dst.clone(),
                src: req.src.clone(),
                message: req.message.clone(),
            }
            .apply_to(Envelope::new(names::MESSAGE, timestamp, clock)),
        );
        // spec.md §4.2 step 6: "user:<dst> for private messages."
        let chat_frame = Envelope::new(names::MESSAGE, timestamp, clock)
            .with_field("src", req.src.clone())
            .with_field("message", req.message.clone());
        if let Err(e) = self.state.publish(&topics::user(&req.dst), chatline_wire::encode(&chat_frame)) {
            clue!(COLLECTOR, WARNING, { chat_fanout_failed: e.description() });
        }
        Status::Ok.apply_to(Envelope::new(names::MESSAGE, timestamp, clock))
    }

    fn emit_replication(&self, envelope: Envelope) {
        clue!(COLLECTOR, DEBUG, { replication_emit: envelope.service.clone() });
        match self.state.publish(topics::REPLICATION, chatline_wire::encode(&envelope)) {
            Ok(()) => WRITES_REPLICATED.click(),
            Err(e) => clue!(COLLECTOR, WARNING, { replication_emit_failed: e.description() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ReplicaId;
    use chatline_storage::InMemoryWriteLog;
    use chatline_transport::inproc::Hub;

    fn pipeline() -> (Pipeline, Hub) {
        let hub = Hub::new();
        let publisher = hub.publisher("tcp://*:5555", "r").unwrap();
        let state = ReplicaState::new(ReplicaId::from("r".to_string()), "tcp://r:5570", Arc::new(InMemoryWriteLog::new()), publisher);
        let transport: Arc<dyn Transport> = Arc::new(hub.clone());
        let pool = Arc::new(EphemeralPool::new(2));
        (Pipeline::new(state, transport, pool), hub)
    }

    #[test]
    fn login_then_duplicate_login_errors() {
        let (pipeline, _hub) = pipeline();
        let request = Envelope::new(names::LOGIN, "t", 0).with_field("user", "alice");
        let reply = chatline_wire::decode(&pipeline.handle(&chatline_wire::encode(&request))).unwrap();
        assert_eq!(Status::Ok.apply_to(Envelope::new(names::LOGIN, "t", 0)).data.get_str("status"), reply.data.get_str("status"));

        let reply2 = chatline_wire::decode(&pipeline.handle(&chatline_wire::encode(&request))).unwrap();
        assert_eq!(names::LOGIN, reply2.service);
        assert_eq!(Some("erro"), reply2.data.get_str("status"));
    }

    #[test]
    fn publish_to_unknown_channel_errors() {
        let (pipeline, _hub) = pipeline();
        let request = Envelope::new(names::PUBLISH, "t", 0)
            .with_field("channel", "general")
            .with_field("user", "alice")
            .with_field("message", "hi");
        let reply = chatline_wire::decode(&pipeline.handle(&chatline_wire::encode(&request))).unwrap();
        assert_eq!(names::ERRO, reply.service);
    }

    #[test]
    fn channel_then_publish_replicates_and_fans_out() {
        let (pipeline, hub) = pipeline();
        let mut replication_sub = hub.subscriber("tcp://*:5555", "observer").unwrap();
        let mut channel_sub = hub.subscriber("tcp://*:5555", "observer").unwrap();
        replication_sub.subscribe(topics::REPLICATION).unwrap();
        channel_sub.subscribe("general").unwrap();

        let channel_req = Envelope::new(names::CHANNEL, "t", 0).with_field("channel", "general");
        pipeline.handle(&chatline_wire::encode(&channel_req));

        let publish_req = Envelope::new(names::PUBLISH, "t", 0)
            .with_field("channel", "general")
            .with_field("user", "alice")
            .with_field("message", "hi");
        let reply = chatline_wire::decode(&pipeline.handle(&chatline_wire::encode(&publish_req))).unwrap();
        assert_eq!(Some("ok"), reply.data.get_str("status"));

        use std::time::Duration;
        let (topic, _payload) = replication_sub.recv(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(topics::REPLICATION, topic);
        let (topic, _payload) = channel_sub.recv(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!("general", topic);
    }

    #[test]
    fn lamport_clock_is_strictly_increasing_across_two_requests() {
        let (pipeline, _hub) = pipeline();
        let r1 = Envelope::new(names::USERS, "t", 0);
        let reply1 = chatline_wire::decode(&pipeline.handle(&chatline_wire::encode(&r1))).unwrap();
        let r2 = Envelope::new(names::USERS, "t", 0);
        let reply2 = chatline_wire::decode(&pipeline.handle(&chatline_wire::encode(&r2))).unwrap();
        assert!(reply2.clock() > reply1.clock());
    }
}
