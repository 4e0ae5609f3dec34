//! chatline-registry is the single-process directory spec.md §4.1 calls for:
//! it assigns ranks, records each replica's advertised P2P endpoint, tracks
//! heartbeats, and serves the TTL-filtered active-peer list every replica's
//! heartbeat driver polls (spec.md §4.4).
//!
//! The Registry has no durability story (spec.md §3: "its in-memory maps are
//! never checkpointed (non-goal)") and no explicit deregistration: liveness
//! is strictly TTL-derived.

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use biometrics::Counter;
use chatline_transport::Router;
use chatline_wire::{names, Envelope, HeartbeatRequest, ListResponse, PeerInfo, RankRequest, RankResponse, Status};
use indicio::{clue, DEBUG, ERROR, INFO, WARNING};

pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/// spec.md GLOSSARY: "HeartbeatTTL: 30 seconds. Peers older than this are
/// treated as down."
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(30);

///////////////////////////////////////////// biometrics ///////////////////////////////////////////

static RANKS_ASSIGNED: Counter = Counter::new("chatline_registry.ranks_assigned");
static RANKS_REUSED: Counter = Counter::new("chatline_registry.ranks_reused");
static HEARTBEATS_OK: Counter = Counter::new("chatline_registry.heartbeats_ok");
static HEARTBEATS_UNKNOWN: Counter = Counter::new("chatline_registry.heartbeats_unknown");
static LIST_REQUESTS: Counter = Counter::new("chatline_registry.list_requests");
static UNKNOWN_SERVICE: Counter = Counter::new("chatline_registry.unknown_service");
static DECODE_FAILURES: Counter = Counter::new("chatline_registry.decode_failures");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&RANKS_ASSIGNED);
    collector.register_counter(&RANKS_REUSED);
    collector.register_counter(&HEARTBEATS_OK);
    collector.register_counter(&HEARTBEATS_UNKNOWN);
    collector.register_counter(&LIST_REQUESTS);
    collector.register_counter(&UNKNOWN_SERVICE);
    collector.register_counter(&DECODE_FAILURES);
}

///////////////////////////////////////////// Entry /////////////////////////////////////////////////

#[derive(Clone, Debug)]
struct Entry {
    rank: u64,
    endpoint: String,
    last_heartbeat: Instant,
}

///////////////////////////////////////////// Inner /////////////////////////////////////////////////

/// `entries` and `next_rank` share one lock: assigning a rank to a new id
/// must be atomic with the existence check, or two concurrent first-time
/// `rank` requests could be handed the same value (spec.md §8 property 1).
struct Inner {
    entries: BTreeMap<String, Entry>,
    next_rank: u64,
}

///////////////////////////////////////////// RegistryState /////////////////////////////////////////

/// The Registry's entire mutable state: the rank/endpoint/heartbeat table
/// and its own Lamport clock (spec.md §3: "a non-negative integer per
/// replica (and per registry)").
pub struct RegistryState {
    inner: Mutex<Inner>,
    clock: Mutex<u64>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                next_rank: 1,
            }),
            clock: Mutex::new(0),
        }
    }

    /// spec.md §3 LC invariant: receive side. Holds the mutex across the
    /// read-then-write.
    fn observe_clock(&self, incoming: u64) {
        let mut clock = self.clock.lock().unwrap();
        *clock = (*clock).max(incoming);
    }

    /// spec.md §3 LC invariant: send side. Holds the mutex across the
    /// read-then-write.
    fn tick_clock(&self) -> u64 {
        let mut clock = self.clock.lock().unwrap();
        *clock += 1;
        *clock
    }

    /// `rank(id, endpoint) -> rank` (spec.md §4.1). Assigns `next_rank` the
    /// first time `id` is seen; every subsequent call for the same `id`
    /// returns the same rank and just refreshes `endpoint`/liveness.
    pub fn rank(&self, id: &str, endpoint: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.endpoint = endpoint.to_string();
            entry.last_heartbeat = Instant::now();
            RANKS_REUSED.click();
            return entry.rank;
        }
        let rank = inner.next_rank;
        inner.next_rank += 1;
        inner.entries.insert(
            id.to_string(),
            Entry {
                rank,
                endpoint: endpoint.to_string(),
                last_heartbeat: Instant::now(),
            },
        );
        RANKS_ASSIGNED.click();
        rank
    }

    /// `heartbeat(id) -> ok | error "not registered"` (spec.md §4.1).
    pub fn heartbeat(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        match inner.entries.get_mut(id) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                HEARTBEATS_OK.click();
                Ok(())
            }
            None => {
                HEARTBEATS_UNKNOWN.click();
                Err(chatline_wire::Error::not_registered(format!("{id} is not registered")).into())
            }
        }
    }

    /// `list() -> [{id, rank, endpoint}]` (spec.md §4.1), sorted by rank
    /// ascending, filtered to entries heartbeat-fresh within
    /// [`HEARTBEAT_TTL`] (spec.md §8 property 3).
    pub fn list(&self) -> Vec<PeerInfo> {
        LIST_REQUESTS.click();
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let mut peers: Vec<PeerInfo> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_heartbeat) < HEARTBEAT_TTL)
            .map(|(id, entry)| PeerInfo {
                id: id.clone(),
                rank: entry.rank,
                endpoint: entry.endpoint.clone(),
            })
            .collect();
        peers.sort_by_key(|p| p.rank);
        peers
    }

    /// Decode, dispatch, and encode one request. Never fails: protocol and
    /// state errors become an `erro` reply (spec.md §7), so the caller's
    /// serve loop never has to handle a dispatch failure.
    pub fn dispatch(&self, payload: &[u8]) -> Vec<u8> {
        let envelope = match chatline_wire::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                DECODE_FAILURES.click();
                clue!(COLLECTOR, WARNING, { decode_failure: { what: e.description() } });
                let timestamp = chatline_wire::now_rfc3339();
                let clock = self.tick_clock();
                return chatline_wire::encode(&Envelope::erro(timestamp, clock, e.description()));
            }
        };
        chatline_wire::encode(&self.dispatch_envelope(&envelope))
    }

    fn dispatch_envelope(&self, request: &Envelope) -> Envelope {
        self.observe_clock(request.clock());
        let timestamp = chatline_wire::now_rfc3339();
        let clock = self.tick_clock();
        let result = self.handle(request, &timestamp, clock);
        match result {
            Ok(envelope) => envelope,
            Err(e) => {
                clue!(COLLECTOR, ERROR, { registry_error: { service: request.service.clone(), what: e.description() } });
                Envelope::erro(timestamp, clock, e.description())
            }
        }
    }

    fn handle(&self, request: &Envelope, timestamp: &str, clock: u64) -> Result<Envelope, Error> {
        match request.service.as_str() {
            names::RANK => {
                let req = RankRequest::from_envelope(request)?;
                let rank = self.rank(&req.id, &req.endpoint);
                clue!(COLLECTOR, INFO, { rank: { id: req.id.clone(), rank: rank } });
                Ok(RankResponse { rank }.apply_to(Envelope::new(names::RANK, timestamp, clock)))
            }
            names::HEARTBEAT => {
                let req = HeartbeatRequest::from_envelope(request)?;
                self.heartbeat(&req.id)?;
                clue!(COLLECTOR, DEBUG, { heartbeat: { id: req.id } });
                Ok(Status::Ok.apply_to(Envelope::new(names::HEARTBEAT, timestamp, clock)))
            }
            names::LIST => {
                let peers = self.list();
                Ok(ListResponse { peers }.apply_to(Envelope::new(names::LIST, timestamp, clock)))
            }
            other => {
                UNKNOWN_SERVICE.click();
                Err(chatline_wire::Error::unknown_service(other).into())
            }
        }
    }

    /// Run the Registry's request/reply loop against `router` until
    /// `should_continue` returns false (spec.md §4.1: "A single-threaded
    /// request/reply service"; spec.md §7: transport errors on the inbound
    /// socket log and continue).
    pub fn serve(
        &self,
        router: &mut dyn Router,
        poll_interval: Duration,
        mut should_continue: impl FnMut() -> bool,
    ) {
        while should_continue() {
            match router.recv(poll_interval) {
                Ok(Some(request)) => {
                    let reply = self.dispatch(&request.payload);
                    if let Err(e) = router.reply(request.identity, reply) {
                        clue!(COLLECTOR, WARNING, { reply_failure: { what: format!("{e:?}") } });
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    clue!(COLLECTOR, WARNING, { transport_error: { what: format!("{e:?}") } });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_wire::Envelope;

    fn rank_request(id: &str, endpoint: &str) -> Envelope {
        Envelope::new(names::RANK, "t", 0)
            .with_field("id", id)
            .with_field("endpoint", endpoint)
    }

    #[test]
    fn s1_registration_assigns_monotonic_ranks() {
        let registry = RegistryState::new();
        let reply = registry.dispatch_envelope(&rank_request("A", "tcp://a:5570"));
        assert_eq!(1, RankResponse::from_envelope(&reply).unwrap().rank);

        let reply = registry.dispatch_envelope(&rank_request("A", "tcp://a:5570"));
        assert_eq!(1, RankResponse::from_envelope(&reply).unwrap().rank);

        let reply = registry.dispatch_envelope(&rank_request("B", "tcp://b:5570"));
        assert_eq!(2, RankResponse::from_envelope(&reply).unwrap().rank);
    }

    #[test]
    fn rank_stability_across_endpoint_change() {
        let registry = RegistryState::new();
        registry.rank("A", "tcp://a:1");
        let rank = registry.rank("A", "tcp://a:2");
        assert_eq!(1, rank);
        let peers = registry.list();
        assert_eq!(1, peers.len());
        assert_eq!("tcp://a:2", peers[0].endpoint);
    }

    #[test]
    fn heartbeat_on_unregistered_id_errors() {
        let registry = RegistryState::new();
        assert!(registry.heartbeat("nope").is_err());
    }

    #[test]
    fn list_is_sorted_by_rank_ascending() {
        let registry = RegistryState::new();
        registry.rank("C", "tcp://c:1");
        registry.rank("A", "tcp://a:1");
        registry.rank("B", "tcp://b:1");
        let peers = registry.list();
        let ranks: Vec<u64> = peers.iter().map(|p| p.rank).collect();
        assert_eq!(vec![1, 2, 3], ranks);
        assert_eq!("C", peers[0].id);
    }

    #[test]
    fn list_omits_entries_past_the_heartbeat_ttl() {
        let registry = RegistryState::new();
        registry.rank("A", "tcp://a:1");
        {
            let mut inner = registry.inner.lock().unwrap();
            let entry = inner.entries.get_mut("A").unwrap();
            entry.last_heartbeat = Instant::now() - HEARTBEAT_TTL - Duration::from_secs(1);
        }
        assert!(registry.list().is_empty());
        registry.heartbeat("A").unwrap();
        assert_eq!(1, registry.list().len());
    }

    #[test]
    fn unknown_service_becomes_erro_reply() {
        let registry = RegistryState::new();
        let request = Envelope::new("bogus", "t", 0);
        let reply = registry.dispatch_envelope(&request);
        assert_eq!(names::ERRO, reply.service);
        assert_eq!("erro", reply.data.get_str("status").unwrap());
    }

    /// spec.md §8 property 1 ("rank monotonicity") and property 2 ("rank
    /// stability"), exercised against randomly generated ids rather than a
    /// handful of literal ones (SPEC_FULL.md §1 [ADD]: property tests use
    /// `guacamole`'s seekable PRNG wherever the property should hold for
    /// arbitrary input, not just the literal ids spec.md §8 spells out).
    #[test]
    fn rank_assignment_is_monotonic_for_randomized_ids() {
        use guacamole::combinators::uuid;
        use guacamole::Guacamole;

        let mut guac = Guacamole::new(0x5EED);
        let registry = RegistryState::new();
        let mut ids = Vec::new();
        for _ in 0..100 {
            ids.push(uuid(&mut guac));
        }

        for (expected_rank, id) in (1u64..).zip(ids.iter()) {
            let rank = registry.rank(id, "tcp://peer:5570");
            assert_eq!(expected_rank, rank);
        }

        // Re-registering every id, in a different (reversed) order, must
        // return the same ranks as first assigned rather than minting new
        // ones or reordering by re-registration order.
        for id in ids.iter().rev() {
            let first_rank = registry.rank(id, "tcp://peer:5570");
            let second_rank = registry.rank(id, "tcp://peer:9999");
            assert_eq!(first_rank, second_rank);
        }

        let mut ranks: Vec<u64> = registry.list().iter().map(|p| p.rank).collect();
        ranks.sort_unstable();
        let expected: Vec<u64> = (1..=ids.len() as u64).collect();
        assert_eq!(expected, ranks);
    }

    #[test]
    fn lamport_clock_advances_past_the_highest_seen_value() {
        let registry = RegistryState::new();
        let request = Envelope::new(names::RANK, "t", 41)
            .with_field("id", "A")
            .with_field("endpoint", "tcp://a:1");
        let reply = registry.dispatch_envelope(&request);
        assert!(reply.clock() > 41);
    }
}
