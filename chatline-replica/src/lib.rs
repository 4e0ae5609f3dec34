//! chatline-replica is the per-replica runtime of the chatline coordination
//! core (spec.md §4.2-§4.7): the client request pipeline, the Lamport clock
//! discipline, the bully election protocol, Christian's-algorithm physical
//! clock sampling, and idempotent replication apply, tied together by one
//! [`ReplicaState`] record per process (spec.md §9: "one replica-state
//! record passed explicitly to all tasks").
//!
//! A replica hosts three long-running tasks (spec.md §5): the [`pipeline`]
//! REP loop for client commands, the [`heartbeat`] driver's REQ loop against
//! the Registry, and the [`p2p`] listener's ROUTER+SUB poll loop. Ephemeral
//! work — [`election`] attempts and [`clocksync`] samples — runs on a shared
//! [`EphemeralPool`](ephemeral::EphemeralPool) rather than one thread per
//! attempt (spec.md §9 redesign flag).

mod clock;
pub mod clocksync;
pub mod election;
pub mod ephemeral;
mod error;
pub mod heartbeat;
pub mod id;
pub mod p2p;
pub mod pipeline;
pub mod replication;
mod state;

pub use clock::{ElectionGuard, ElectionLock, LamportClock};
pub use error::Error;
pub use ephemeral::EphemeralPool;
pub use id::ReplicaId;
pub use state::{ReplicaState, MSG_COUNT_TRIGGER};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatline_storage::WriteLog;
use chatline_transport::Transport;

/// Register every chatline-replica counter with `collector`, alongside the
/// crates it links (`chatline-storage`, `chatline-transport`). Called once
/// from the replica server binary's `main`.
pub fn register_biometrics(collector: &biometrics::Collector) {
    pipeline::register_biometrics(collector);
    chatline_storage::register_biometrics(collector);
    chatline_transport::inproc::register_biometrics(collector);
}

/// Register `emitter` with every one of this crate's per-module structured
/// logging collectors (`pipeline`, `heartbeat`, `election`, `clocksync`,
/// `replication`, `p2p`) and set each to `verbosity`. Each module owns its
/// own `static COLLECTOR` (spec.md §9: "a logging collector scoped to the
/// module that owns the decisions worth logging"), so none of them emit
/// anywhere until this is called once from the replica server binary's
/// `main`, the same way `register_biometrics` wires up counters.
pub fn register_logging<E: indicio::Emitter + Sync + 'static>(emitter: Arc<E>, verbosity: u64) {
    for collector in [
        pipeline::collector(),
        heartbeat::collector(),
        election::collector(),
        clocksync::collector(),
        replication::collector(),
        p2p::collector(),
    ] {
        collector.register(emitter.clone());
        collector.set_verbosity(verbosity);
    }
}

/// The fixed set of endpoints and tuning knobs one replica process needs to
/// stand up its three long-running tasks (spec.md §6, GLOSSARY).
pub struct ReplicaConfig {
    pub command_endpoint: String,
    pub p2p_endpoint: String,
    pub pubsub_publish_endpoint: String,
    pub pubsub_subscribe_endpoint: String,
    pub registry_endpoint: String,
    pub heartbeat_interval: Duration,
    pub p2p_poll_slice: Duration,
}

impl ReplicaConfig {
    /// spec.md §6's well-known endpoints and GLOSSARY's `HeartbeatInterval`.
    pub fn with_defaults(p2p_endpoint: impl Into<String>) -> Self {
        Self {
            command_endpoint: "tcp://*:5558".to_string(),
            p2p_endpoint: p2p_endpoint.into(),
            pubsub_publish_endpoint: "tcp://*:5555".to_string(),
            pubsub_subscribe_endpoint: "tcp://*:5556".to_string(),
            registry_endpoint: "tcp://*:5560".to_string(),
            heartbeat_interval: heartbeat::HEARTBEAT_INTERVAL,
            p2p_poll_slice: Duration::from_millis(250),
        }
    }
}

/// A fully wired replica process: the shared state record, the transport
/// handle every task borrows from, and the ephemeral worker pool elections
/// and clock syncs run on. [`Replica::run`] blocks the calling thread
/// running the main client-request loop, after spawning the other two
/// long-running tasks on their own threads.
pub struct Replica {
    pub state: Arc<ReplicaState>,
    transport: Arc<dyn Transport>,
    pool: Arc<EphemeralPool>,
    config: ReplicaConfig,
}

impl Replica {
    /// Bind every socket this replica needs and subscribe its P2P listener
    /// to `servers`/`replication` (spec.md §4.3). Does not yet register with
    /// the Registry or start serving; that happens in [`Replica::run`] (the
    /// heartbeat driver's first tick performs the `rank` RPC, per
    /// SPEC_FULL.md §9 open question 3).
    pub fn bind(
        id: ReplicaId,
        config: ReplicaConfig,
        transport: Arc<dyn Transport>,
        write_log: Arc<dyn WriteLog>,
    ) -> Result<Self, Error> {
        let publisher = transport.publisher(&config.pubsub_publish_endpoint, id.as_str())?;
        let state = ReplicaState::new(id, config.p2p_endpoint.clone(), write_log, publisher);
        Ok(Self {
            state,
            transport,
            pool: Arc::new(EphemeralPool::new(4)),
            config,
        })
    }

    /// Run every long-running task until `cancelled` is observed set. The
    /// P2P listener and heartbeat driver run on their own threads; the
    /// calling thread becomes the client-request REP loop (spec.md §5
    /// "Main").
    pub fn run(&self, router: &mut dyn chatline_transport::Router, cancelled: Arc<AtomicBool>) {
        let heartbeat_handle = {
            let state = self.state.clone();
            let transport = self.transport.clone();
            let pool = self.pool.clone();
            let registry_endpoint = self.config.registry_endpoint.clone();
            let interval = self.config.heartbeat_interval;
            let cancelled = cancelled.clone();
            std::thread::spawn(move || {
                heartbeat::run(state, transport, pool, registry_endpoint, interval, move || {
                    !cancelled.load(Ordering::SeqCst)
                });
            })
        };

        let p2p_handle = {
            let state = self.state.clone();
            let transport = self.transport.clone();
            let pool = self.pool.clone();
            let p2p_endpoint = self.config.p2p_endpoint.clone();
            let sub_endpoint = self.config.pubsub_subscribe_endpoint.clone();
            let slice = self.config.p2p_poll_slice;
            let cancelled = cancelled.clone();
            std::thread::spawn(move || {
                let collector = p2p::collector();
                let mut p2p_router = match transport.bind_router(&p2p_endpoint) {
                    Ok(r) => r,
                    Err(e) => {
                        indicio::clue!(collector, indicio::ERROR, { p2p_bind_failed: format!("{e:?}") });
                        return;
                    }
                };
                let mut subscriber = match transport.subscriber(&sub_endpoint, state.id.as_str()) {
                    Ok(s) => s,
                    Err(e) => {
                        indicio::clue!(collector, indicio::ERROR, { p2p_subscribe_failed: format!("{e:?}") });
                        return;
                    }
                };
                if subscriber.subscribe(chatline_wire::topics::SERVERS).is_err()
                    || subscriber.subscribe(chatline_wire::topics::REPLICATION).is_err()
                {
                    return;
                }
                p2p::serve(&state, p2p_router.as_mut(), subscriber.as_mut(), &transport, &pool, slice, move || {
                    !cancelled.load(Ordering::SeqCst)
                });
            })
        };

        let pipeline = pipeline::Pipeline::new(self.state.clone(), self.transport.clone(), self.pool.clone());
        let collector = pipeline::collector();
        while !cancelled.load(Ordering::SeqCst) {
            match router.recv(self.config.p2p_poll_slice) {
                Ok(Some(request)) => {
                    let reply = pipeline.handle(&request.payload);
                    if let Err(e) = router.reply(request.identity, reply) {
                        indicio::clue!(collector, indicio::WARNING, { reply_failed: format!("{e:?}") });
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    indicio::clue!(collector, indicio::WARNING, { command_transport_error: format!("{e:?}") });
                }
            }
        }

        let _ = heartbeat_handle.join();
        let _ = p2p_handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_storage::InMemoryWriteLog;
    use chatline_transport::inproc::Hub;
    use chatline_wire::{names, Envelope};
    use std::sync::atomic::AtomicBool;

    #[test]
    fn end_to_end_registration_election_and_replication() {
        let hub = Hub::new();
        let transport: Arc<dyn Transport> = Arc::new(hub.clone());

        let registry = Arc::new(chatline_registry::RegistryState::new());
        let mut registry_router = hub.bind_router("tcp://*:5560").unwrap();
        let registry_for_thread = registry.clone();
        let registry_cancel = Arc::new(AtomicBool::new(false));
        let registry_cancel_clone = registry_cancel.clone();
        let registry_handle = std::thread::spawn(move || {
            registry_for_thread.serve(registry_router.as_mut(), Duration::from_millis(50), move || {
                !registry_cancel_clone.load(Ordering::SeqCst)
            });
        });

        let config_a = ReplicaConfig {
            command_endpoint: "tcp://*:5558a".to_string(),
            heartbeat_interval: Duration::from_millis(20),
            p2p_poll_slice: Duration::from_millis(20),
            ..ReplicaConfig::with_defaults("tcp://a:5570")
        };
        let replica_a = Replica::bind(
            ReplicaId::from("a".to_string()),
            config_a,
            transport.clone(),
            Arc::new(InMemoryWriteLog::new()),
        )
        .unwrap();

        let config_b = ReplicaConfig {
            command_endpoint: "tcp://*:5558b".to_string(),
            heartbeat_interval: Duration::from_millis(20),
            p2p_poll_slice: Duration::from_millis(20),
            ..ReplicaConfig::with_defaults("tcp://b:5570")
        };
        let replica_b = Replica::bind(
            ReplicaId::from("b".to_string()),
            config_b,
            transport.clone(),
            Arc::new(InMemoryWriteLog::new()),
        )
        .unwrap();

        let mut router_a = transport.bind_router("tcp://*:5558a").unwrap();
        let mut router_b = transport.bind_router("tcp://*:5558b").unwrap();

        let state_b = replica_b.state.clone();

        let cancel_a = Arc::new(AtomicBool::new(false));
        let cancel_a2 = cancel_a.clone();
        let handle_a = std::thread::spawn(move || replica_a.run(router_a.as_mut(), cancel_a2));

        let cancel_b = Arc::new(AtomicBool::new(false));
        let cancel_b2 = cancel_b.clone();
        let handle_b = std::thread::spawn(move || replica_b.run(router_b.as_mut(), cancel_b2));

        // Let both replicas register, elect a coordinator, and have replica
        // B pick up the `servers` announcement.
        std::thread::sleep(Duration::from_millis(400));

        let mut client = transport.connect_request("tcp://*:5558a").unwrap();
        let channel_req = Envelope::new(names::CHANNEL, "t", 0).with_field("channel", "general");
        let reply = client.call(chatline_wire::encode(&channel_req), Duration::from_secs(1)).unwrap();
        let reply = chatline_wire::decode(&reply).unwrap();
        assert_eq!(Some("ok"), reply.data.get_str("status"));

        let publish_req = Envelope::new(names::PUBLISH, "t", 0)
            .with_field("channel", "general")
            .with_field("user", "alice")
            .with_field("message", "hi");
        let reply = client.call(chatline_wire::encode(&publish_req), Duration::from_secs(1)).unwrap();
        let reply = chatline_wire::decode(&reply).unwrap();
        assert_eq!(Some("ok"), reply.data.get_str("status"));

        // Replica B should have learned about "general" and the message
        // through the replication topic, without the client ever talking to
        // it directly (spec.md §8 S5).
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(vec!["general".to_string()], state_b.write_log().list_channels());

        cancel_a.store(true, Ordering::SeqCst);
        cancel_b.store(true, Ordering::SeqCst);
        registry_cancel.store(true, Ordering::SeqCst);
        handle_a.join().unwrap();
        handle_b.join().unwrap();
        registry_handle.join().unwrap();
    }
}
