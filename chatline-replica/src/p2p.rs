//! The P2P listener (spec.md §4.3): a ROUTER face for direct peer RPCs
//! (`election`, `clock`) plus a SUB face for the `servers` and `replication`
//! broadcast topics, serviced by "a single cooperative poll loop."

use std::sync::Arc;
use std::time::Duration;

use chatline_transport::{Router, RouterRequest, TopicSubscriber, Transport};
use chatline_wire::{names, topics, ClockResponse, ElectionAnnouncement, ElectionRequest, Envelope};
use indicio::{clue, DEBUG, INFO, WARNING};

use crate::election;
use crate::ephemeral::EphemeralPool;
use crate::id::ReplicaId;
use crate::state::ReplicaState;

static COLLECTOR: indicio::Collector = indicio::Collector::new();

pub fn collector() -> &'static indicio::Collector {
    &COLLECTOR
}

/// Service the ROUTER and SUB faces until `should_continue` returns false.
/// Each source gets a short, non-blocking-ish slice of `slice` so neither
/// starves the other within one iteration (spec.md §4.3: "a single
/// cooperative poll loop").
#[allow(clippy::too_many_arguments)]
pub fn serve(
    state: &Arc<ReplicaState>,
    router: &mut dyn Router,
    subscriber: &mut dyn TopicSubscriber,
    transport: &Arc<dyn Transport>,
    pool: &Arc<EphemeralPool>,
    slice: Duration,
    mut should_continue: impl FnMut() -> bool,
) {
    while should_continue() {
        match router.recv(slice) {
            Ok(Some(request)) => handle_router_request(state, router, request, transport, pool),
            Ok(None) => {}
            Err(e) => clue!(COLLECTOR, WARNING, { router_error: format!("{e:?}") }),
        }
        match subscriber.recv(slice) {
            Ok(Some((topic, payload))) => handle_sub_frame(state, &topic, &payload),
            Ok(None) => {}
            Err(e) => clue!(COLLECTOR, WARNING, { subscriber_error: format!("{e:?}") }),
        }
    }
}

fn handle_router_request(
    state: &Arc<ReplicaState>,
    router: &mut dyn Router,
    request: RouterRequest,
    transport: &Arc<dyn Transport>,
    pool: &Arc<EphemeralPool>,
) {
    let reply = match chatline_wire::decode(&request.payload) {
        Ok(envelope) => {
            state.clock.observe(envelope.clock());
            dispatch_router(state, &envelope, transport, pool)
        }
        Err(e) => {
            clue!(COLLECTOR, WARNING, { p2p_decode_failure: e.description() });
            Envelope::erro(chatline_wire::now_rfc3339(), state.clock.tick(), e.description())
        }
    };
    if let Err(e) = router.reply(request.identity, chatline_wire::encode(&reply)) {
        clue!(COLLECTOR, WARNING, { p2p_reply_failed: format!("{e:?}") });
    }
}

fn dispatch_router(state: &Arc<ReplicaState>, request: &Envelope, transport: &Arc<dyn Transport>, pool: &Arc<EphemeralPool>) -> Envelope {
    let timestamp = chatline_wire::now_rfc3339();
    let clock = state.clock.tick();
    match request.service.as_str() {
        names::ELECTION => {
            let result = ElectionRequest::from_envelope(request);
            match result {
                Ok(req) => {
                    // spec.md §4.3: "if this replica's rank exceeds
                    // sender_rank, spawn its own election attempt (bully
                    // recursion)."
                    if let Some(self_rank) = state.rank() {
                        if self_rank > req.rank {
                            if let Some(guard) = state.try_acquire_election() {
                                let state = state.clone();
                                let transport = transport.clone();
                                let pool = pool.clone();
                                pool.spawn(move || election::run(&state, guard, transport, &pool));
                            }
                        }
                    }
                    Envelope::new(names::ELECTION, timestamp, clock).with_field("election", "OK")
                }
                Err(e) => Envelope::erro(timestamp, clock, e.description()),
            }
        }
        names::CLOCK => {
            let time = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            ClockResponse { time }.apply_to(Envelope::new(names::CLOCK, timestamp, clock))
        }
        other => {
            clue!(COLLECTOR, WARNING, { p2p_unknown_service: other.to_string() });
            Envelope::erro(timestamp, clock, format!("unknown service: {other}"))
        }
    }
}

fn handle_sub_frame(state: &Arc<ReplicaState>, topic: &str, payload: &[u8]) {
    let envelope = match chatline_wire::decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            clue!(COLLECTOR, WARNING, { p2p_sub_decode_failure: e.description() });
            return;
        }
    };
    state.clock.observe(envelope.clock());

    if topic == topics::SERVERS {
        if envelope.service == names::ELECTION {
            if let Ok(announcement) = ElectionAnnouncement::from_envelope(&envelope) {
                clue!(COLLECTOR, INFO, { coordinator_changed: announcement.coordinator.clone() });
                state.set_coordinator(ReplicaId::from(announcement.coordinator));
            }
        }
        return;
    }

    if topic == topics::REPLICATION {
        match crate::replication::apply(state, &envelope) {
            Ok(()) => clue!(COLLECTOR, DEBUG, { replication_applied: envelope.service.clone() }),
            Err(e) => clue!(COLLECTOR, WARNING, { replication_apply_failed: e.description() }),
        }
    }
}
