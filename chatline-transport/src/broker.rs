//! The two broker processes spec.md §1 names as external collaborators,
//! specified there only by interface. This workspace includes minimal,
//! fully-working implementations over the trait set in [`crate`] so the
//! end-to-end scenarios in spec.md §8 are runnable without a real ZeroMQ
//! deployment, deliberately as thin as `broker.py`'s `zmq.proxy` call — no
//! business logic lives here (SPEC_FULL.md §4.0).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use indicio::{clue, DEBUG, WARNING};

use crate::{Error, RequestChannel, Router, TopicPublisher, TopicSubscriber};

static COLLECTOR: indicio::Collector = indicio::Collector::new();

/// Register this crate's structured-logging collector with a stdio (or
/// other) emitter. Called once from each binary's `main`.
pub fn collector() -> &'static indicio::Collector {
    &COLLECTOR
}

/// Relays client REQ frames to a fair-queued pool of replica workers
/// (spec.md §2: "Relays client REQ frames to the pool of replica workers").
/// `clients` is the ROUTER face bound at the client-facing endpoint
/// (`tcp://*:5557`); each entry in `workers` is a DEALER-like connection to
/// one replica's own request-pipeline endpoint (`tcp://*:5558` in a real
/// deployment, one bind per replica here). `CommandBroker` owns no chat
/// semantics, only round-robin dispatch.
pub struct CommandBroker {
    clients: Box<dyn Router>,
    workers: Vec<Box<dyn RequestChannel>>,
    next_worker: AtomicUsize,
    worker_timeout: Duration,
}

impl CommandBroker {
    pub fn new(
        clients: Box<dyn Router>,
        workers: Vec<Box<dyn RequestChannel>>,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            clients,
            workers,
            next_worker: AtomicUsize::new(0),
            worker_timeout,
        }
    }

    /// Service one client request, if one is waiting within `timeout`.
    /// Returns `Ok(true)` if a request was relayed, `Ok(false)` if the
    /// deadline elapsed with nothing to do.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool, Error> {
        let Some(request) = self.clients.recv(timeout)? else {
            return Ok(false);
        };
        if self.workers.is_empty() {
            clue!(COLLECTOR, WARNING, { command_broker: { dropped: "no workers registered" } });
            return Ok(true);
        }
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &mut self.workers[idx];
        match worker.call(request.payload.clone(), self.worker_timeout) {
            Ok(reply) => self.clients.reply(request.identity, reply)?,
            Err(e) => {
                // The real broker has no reply to send back either: a dead
                // worker just leaves the client's REQ socket to time out on
                // its own deadline, the same outcome as here.
                clue!(COLLECTOR, WARNING, { command_broker: { worker_error: format!("{e:?}") } });
            }
        }
        Ok(true)
    }
}

/// Fans chat traffic out from an ingress face (publishers) to an egress
/// face (subscribers) (spec.md §2). Subscribes to every topic it has ever
/// seen and republishes each frame verbatim; this mirrors an XSUB/XPUB
/// proxy's subscription-forwarding behavior closely enough for this
/// workspace's purposes without reimplementing XPUB's subscription
/// announcement protocol.
pub struct PubSubProxy {
    ingress: Box<dyn TopicSubscriber>,
    egress: Box<dyn TopicPublisher>,
}

impl PubSubProxy {
    pub fn new(ingress: Box<dyn TopicSubscriber>, egress: Box<dyn TopicPublisher>, topics: &[&str]) -> Result<Self, Error> {
        let mut ingress = ingress;
        for topic in topics {
            ingress.subscribe(topic)?;
        }
        Ok(Self { ingress, egress })
    }

    /// Relay one inbound frame, if one arrives within `timeout`.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool, Error> {
        let Some((topic, payload)) = self.ingress.recv(timeout)? else {
            return Ok(false);
        };
        clue!(COLLECTOR, DEBUG, { pubsub_proxy: { relay: topic.clone() } });
        self.egress.publish(&topic, payload)?;
        Ok(true)
    }
}
