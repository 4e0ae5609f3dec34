//! The heartbeat/election driver (spec.md §4.4): one cooperative task per
//! replica that registers with the Registry, then on every tick refreshes
//! its heartbeat, refreshes [`crate::state::ReplicaState`]'s cached
//! `ActivePeers`, and — if the bound coordinator looks dead or absent —
//! launches an election attempt.

use std::sync::Arc;
use std::time::Duration;

use chatline_transport::Transport;
use chatline_wire::{names, Envelope, HeartbeatRequest, ListResponse, RankRequest, RankResponse};
use indicio::{clue, DEBUG, INFO, WARNING};

use crate::election;
use crate::ephemeral::EphemeralPool;
use crate::state::ReplicaState;

static COLLECTOR: indicio::Collector = indicio::Collector::new();

pub fn collector() -> &'static indicio::Collector {
    &COLLECTOR
}

/// spec.md GLOSSARY: "HeartbeatInterval: 15 seconds. Cadence of Registry
/// heartbeat/list."
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Bound on a single Registry RPC. spec.md §5 notes "Registry RPCs have no
/// explicit timeout in scope"; this is just generous enough to never be the
/// limiting factor against [`HEARTBEAT_INTERVAL`].
const REGISTRY_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempt `rank(id, endpoint)` once. SPEC_FULL.md §9 open question 3:
/// "retry at every heartbeat tick until a rank is obtained" — a replica
/// without a rank still serves client commands (the caller's main loop does
/// not wait on this), but does not participate in elections until ranked.
fn try_register(state: &ReplicaState, transport: &dyn Transport, registry_endpoint: &str) {
    if state.rank().is_some() {
        return;
    }
    let result = (|| -> Result<u64, crate::error::Error> {
        let mut channel = transport.connect_request(registry_endpoint)?;
        let request = RankRequest {
            id: state.id.to_string(),
            endpoint: state.p2p_endpoint.clone(),
        }
        .apply_to(Envelope::new(names::RANK, chatline_wire::now_rfc3339(), state.clock.tick()));
        let reply = channel.call(chatline_wire::encode(&request), REGISTRY_RPC_TIMEOUT)?;
        let envelope = chatline_wire::decode(&reply)?;
        state.clock.observe(envelope.clock());
        Ok(RankResponse::from_envelope(&envelope)?.rank)
    })();
    match result {
        Ok(rank) => {
            state.set_rank(rank);
            clue!(COLLECTOR, INFO, { registered: { id: state.id.to_string(), rank: rank } });
        }
        Err(e) => {
            clue!(COLLECTOR, WARNING, { registration_failed: e.description() });
        }
    }
}

fn send_heartbeat(state: &ReplicaState, transport: &dyn Transport, registry_endpoint: &str) -> Result<(), crate::error::Error> {
    let mut channel = transport.connect_request(registry_endpoint)?;
    let request = HeartbeatRequest { id: state.id.to_string() }
        .apply_to(Envelope::new(names::HEARTBEAT, chatline_wire::now_rfc3339(), state.clock.tick()));
    let reply = channel.call(chatline_wire::encode(&request), REGISTRY_RPC_TIMEOUT)?;
    let envelope = chatline_wire::decode(&reply)?;
    state.clock.observe(envelope.clock());
    Ok(())
}

fn refresh_active_peers(state: &ReplicaState, transport: &dyn Transport, registry_endpoint: &str) -> Result<(), crate::error::Error> {
    let mut channel = transport.connect_request(registry_endpoint)?;
    let request = Envelope::new(names::LIST, chatline_wire::now_rfc3339(), state.clock.tick());
    let reply = channel.call(chatline_wire::encode(&request), REGISTRY_RPC_TIMEOUT)?;
    let envelope = chatline_wire::decode(&reply)?;
    state.clock.observe(envelope.clock());
    let peers = ListResponse::from_envelope(&envelope)?.peers;
    state.set_active_peers(peers);
    Ok(())
}

/// spec.md §4.4 step 4: "if no coordinator is bound, or the bound
/// coordinator's id is not in ActivePeers, attempt to acquire the election
/// lock (non-blocking). On success, launch the election protocol. On
/// failure, another election is in flight; skip."
fn maybe_trigger_election(state: &Arc<ReplicaState>, transport: &Arc<dyn Transport>, pool: &Arc<EphemeralPool>) {
    if state.rank().is_none() {
        return;
    }
    let coordinator_missing = match state.coordinator() {
        None => true,
        Some(id) => !state.peer_is_active(id.as_str()),
    };
    if !coordinator_missing {
        return;
    }
    let Some(guard) = state.try_acquire_election() else {
        clue!(COLLECTOR, DEBUG, { election_already_in_flight: state.id.to_string() });
        return;
    };
    clue!(COLLECTOR, INFO, { election_triggered: state.id.to_string() });
    let state = state.clone();
    let transport = transport.clone();
    let pool_for_spawn = pool.clone();
    pool.spawn(move || election::run(&state, guard, transport, &pool_for_spawn));
}

/// One heartbeat-interval tick: register if unranked, heartbeat, refresh
/// peers, and evaluate coordinator health. Exposed separately from
/// [`run`] so tests can drive a single tick deterministically.
pub fn tick(state: &Arc<ReplicaState>, transport: &Arc<dyn Transport>, pool: &Arc<EphemeralPool>, registry_endpoint: &str) {
    try_register(state, transport.as_ref(), registry_endpoint);

    if let Err(e) = send_heartbeat(state, transport.as_ref(), registry_endpoint) {
        clue!(COLLECTOR, WARNING, { heartbeat_failed: e.description() });
    }
    if let Err(e) = refresh_active_peers(state, transport.as_ref(), registry_endpoint) {
        clue!(COLLECTOR, WARNING, { list_refresh_failed: e.description() });
    }

    maybe_trigger_election(state, transport, pool);
}

/// Run the heartbeat/election driver until `should_continue` returns false
/// (spec.md §4.4: "Sleep HeartbeatInterval" between ticks).
pub fn run(
    state: Arc<ReplicaState>,
    transport: Arc<dyn Transport>,
    pool: Arc<EphemeralPool>,
    registry_endpoint: String,
    interval: Duration,
    mut should_continue: impl FnMut() -> bool,
) {
    while should_continue() {
        tick(&state, &transport, &pool, &registry_endpoint);
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ReplicaId;
    use chatline_registry::RegistryState;
    use chatline_storage::InMemoryWriteLog;
    use chatline_transport::inproc::Hub;
    use chatline_wire::PeerInfo;
    use std::thread;

    fn replica(hub: &Hub, id: &str) -> Arc<ReplicaState> {
        let publisher = hub.publisher("tcp://*:5555", id).unwrap();
        ReplicaState::new(ReplicaId::from(id.to_string()), format!("tcp://{id}:5570"), Arc::new(InMemoryWriteLog::new()), publisher)
    }

    fn spawn_registry(hub: &Hub, endpoint: &str) -> Arc<RegistryState> {
        let registry = Arc::new(RegistryState::new());
        let mut router = hub.bind_router(endpoint).unwrap();
        let r = registry.clone();
        thread::spawn(move || {
            r.serve(router.as_mut(), Duration::from_millis(50), || true);
        });
        registry
    }

    #[test]
    fn tick_registers_and_acquires_a_rank() {
        let hub = Hub::new();
        let _registry = spawn_registry(&hub, "tcp://*:5560");
        let a = replica(&hub, "a");
        let transport: Arc<dyn Transport> = Arc::new(hub.clone());
        let pool = Arc::new(EphemeralPool::new(2));
        assert_eq!(None, a.rank());
        tick(&a, &transport, &pool, "tcp://*:5560");
        assert_eq!(Some(1), a.rank());
    }

    #[test]
    fn tick_refreshes_active_peers_from_the_registry() {
        let hub = Hub::new();
        let _registry = spawn_registry(&hub, "tcp://*:5560");
        let a = replica(&hub, "a");
        let b = replica(&hub, "b");
        let transport: Arc<dyn Transport> = Arc::new(hub.clone());
        let pool = Arc::new(EphemeralPool::new(2));
        tick(&a, &transport, &pool, "tcp://*:5560");
        tick(&b, &transport, &pool, "tcp://*:5560");
        tick(&a, &transport, &pool, "tcp://*:5560");
        assert_eq!(2, a.active_peers().len());
    }

    #[test]
    fn missing_coordinator_triggers_an_election_that_self_wins() {
        let hub = Hub::new();
        let _registry = spawn_registry(&hub, "tcp://*:5560");
        let a = replica(&hub, "a");
        let transport: Arc<dyn Transport> = Arc::new(hub.clone());
        let pool = Arc::new(EphemeralPool::new(2));
        tick(&a, &transport, &pool, "tcp://*:5560");
        assert_eq!(None, a.coordinator());
        // Second tick: rank is known, ActivePeers has only self, no
        // coordinator bound yet -> should self-win.
        tick(&a, &transport, &pool, "tcp://*:5560");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(Some(ReplicaId::from("a".to_string())), a.coordinator());
    }

    #[test]
    fn election_not_retriggered_while_coordinator_is_active() {
        let hub = Hub::new();
        let _registry = spawn_registry(&hub, "tcp://*:5560");
        let a = replica(&hub, "a");
        a.set_rank(1);
        a.set_coordinator(ReplicaId::from("a".to_string()));
        a.set_active_peers(vec![PeerInfo { id: "a".into(), rank: 1, endpoint: "tcp://a:5570".into() }]);
        let transport: Arc<dyn Transport> = Arc::new(hub.clone());
        let pool = Arc::new(EphemeralPool::new(2));
        maybe_trigger_election(&a, &transport, &pool);
        assert!(!a.election_in_progress());
    }
}
