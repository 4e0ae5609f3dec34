//! A single-process implementation of every trait in [`crate`], built on
//! `std::sync::mpsc` channels behind one shared [`Hub`]. This is the
//! reference transport the chatline coordination core is verified against
//! (SPEC_FULL.md §2), the way `busyrpc`'s `Channel`/`Pollster` pair is the
//! reference transport `rpc_pb::Server`/`Client` is verified against there.
//!
//! A [`Hub`] is a cheap, `Clone`-able handle: every clone shares the same
//! router bindings and topic subscriptions, so a test or an in-process demo
//! hands out one `Hub` and calls `bind_router`/`connect_request`/
//! `publisher`/`subscriber` on it from as many components as it likes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biometrics::Counter;

use crate::{Error, Identity, RequestChannel, Router, RouterRequest, TopicPublisher, TopicSubscriber, Transport};

static REQUESTS_SENT: Counter = Counter::new("chatline_transport.inproc.requests_sent");
static REQUESTS_ROUTED: Counter = Counter::new("chatline_transport.inproc.requests_routed");
static REPLIES_SENT: Counter = Counter::new("chatline_transport.inproc.replies_sent");
static REPLIES_DROPPED: Counter = Counter::new("chatline_transport.inproc.replies_dropped");
static FRAMES_PUBLISHED: Counter = Counter::new("chatline_transport.inproc.frames_published");
static FRAMES_DELIVERED: Counter = Counter::new("chatline_transport.inproc.frames_delivered");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&REQUESTS_SENT);
    collector.register_counter(&REQUESTS_ROUTED);
    collector.register_counter(&REPLIES_SENT);
    collector.register_counter(&REPLIES_DROPPED);
    collector.register_counter(&FRAMES_PUBLISHED);
    collector.register_counter(&FRAMES_DELIVERED);
}

struct PendingRequest {
    payload: Vec<u8>,
    reply_tx: Sender<Vec<u8>>,
}

struct TopicSubscription {
    identity: String,
    tx: Sender<(String, Vec<u8>)>,
}

#[derive(Default)]
struct HubState {
    routers: HashMap<String, Sender<PendingRequest>>,
    topics: HashMap<String, Vec<TopicSubscription>>,
}

/// A shared, in-process message bus. See the module docs.
#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }
}

impl Transport for Hub {
    fn connect_request(&self, endpoint: &str) -> Result<Box<dyn RequestChannel>, Error> {
        Ok(Box::new(InprocRequestChannel {
            hub: self.state.clone(),
            endpoint: endpoint.to_string(),
        }))
    }

    fn bind_router(&self, endpoint: &str) -> Result<Box<dyn Router>, Error> {
        let (tx, rx) = mpsc::channel();
        self.state.lock().unwrap().routers.insert(endpoint.to_string(), tx);
        Ok(Box::new(InprocRouter {
            rx,
            pending: HashMap::new(),
            next_identity: AtomicU64::new(1),
        }))
    }

    fn publisher(&self, _endpoint: &str, identity: &str) -> Result<Box<dyn TopicPublisher>, Error> {
        Ok(Box::new(InprocPublisher {
            hub: self.state.clone(),
            identity: identity.to_string(),
        }))
    }

    fn subscriber(&self, _endpoint: &str, identity: &str) -> Result<Box<dyn TopicSubscriber>, Error> {
        let (tx, rx) = mpsc::channel();
        Ok(Box::new(InprocSubscriber {
            hub: self.state.clone(),
            identity: identity.to_string(),
            tx,
            rx,
        }))
    }
}

///////////////////////////////////////// InprocRequestChannel /////////////////////////////////////

struct InprocRequestChannel {
    hub: Arc<Mutex<HubState>>,
    endpoint: String,
}

impl RequestChannel for InprocRequestChannel {
    fn call(&mut self, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, Error> {
        let router_tx = {
            let state = self.hub.lock().unwrap();
            state
                .routers
                .get(&self.endpoint)
                .cloned()
                .ok_or_else(|| Error::unreachable(self.endpoint.clone()))?
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        router_tx
            .send(PendingRequest { payload, reply_tx })
            .map_err(|_| Error::unreachable(self.endpoint.clone()))?;
        REQUESTS_SENT.click();
        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(Error::timeout()),
            Err(RecvTimeoutError::Disconnected) => Err(Error::closed()),
        }
    }
}

///////////////////////////////////////////// InprocRouter /////////////////////////////////////////

struct InprocRouter {
    rx: Receiver<PendingRequest>,
    pending: HashMap<Identity, Sender<Vec<u8>>>,
    next_identity: AtomicU64,
}

impl Router for InprocRouter {
    fn recv(&mut self, timeout: Duration) -> Result<Option<RouterRequest>, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(req) => {
                let identity = Identity(self.next_identity.fetch_add(1, Ordering::Relaxed));
                self.pending.insert(identity, req.reply_tx);
                REQUESTS_ROUTED.click();
                Ok(Some(RouterRequest {
                    identity,
                    payload: req.payload,
                }))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::closed()),
        }
    }

    fn reply(&mut self, identity: Identity, payload: Vec<u8>) -> Result<(), Error> {
        match self.pending.remove(&identity) {
            Some(tx) => {
                // The caller may have already given up; a dropped receiver
                // here just means the reply is discarded, matching a real
                // ROUTER socket's fire-and-forget send.
                if tx.send(payload).is_ok() {
                    REPLIES_SENT.click();
                } else {
                    REPLIES_DROPPED.click();
                }
                Ok(())
            }
            None => {
                REPLIES_DROPPED.click();
                Ok(())
            }
        }
    }
}

///////////////////////////////////////////// InprocPublisher //////////////////////////////////////

struct InprocPublisher {
    hub: Arc<Mutex<HubState>>,
    identity: String,
}

impl TopicPublisher for InprocPublisher {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        FRAMES_PUBLISHED.click();
        let state = self.hub.lock().unwrap();
        let Some(subscribers) = state.topics.get(topic) else {
            return Ok(());
        };
        for sub in subscribers {
            // spec.md §9 open question 1, resolved in SPEC_FULL.md: the
            // originator of a frame never receives its own broadcast.
            if sub.identity == self.identity {
                continue;
            }
            if sub.tx.send((topic.to_string(), payload.clone())).is_ok() {
                FRAMES_DELIVERED.click();
            }
        }
        Ok(())
    }
}

///////////////////////////////////////////// InprocSubscriber /////////////////////////////////////

struct InprocSubscriber {
    hub: Arc<Mutex<HubState>>,
    identity: String,
    tx: Sender<(String, Vec<u8>)>,
    rx: Receiver<(String, Vec<u8>)>,
}

impl TopicSubscriber for InprocSubscriber {
    fn subscribe(&mut self, topic: &str) -> Result<(), Error> {
        let mut state = self.hub.lock().unwrap();
        let subscribers = state.topics.entry(topic.to_string()).or_default();
        if subscribers.iter().any(|s| s.identity == self.identity) {
            return Ok(());
        }
        subscribers.push(TopicSubscription {
            identity: self.identity.clone(),
            tx: self.tx.clone(),
        });
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<(String, Vec<u8>)>, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::closed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn request_reply_round_trips() {
        let hub = Hub::new();
        let mut router = hub.bind_router("tcp://*:9999").unwrap();
        let mut client = hub.connect_request("tcp://*:9999").unwrap();
        let server = thread::spawn(move || {
            let req = router.recv(Duration::from_secs(1)).unwrap().unwrap();
            assert_eq!(req.payload, b"ping".to_vec());
            router.reply(req.identity, b"pong".to_vec()).unwrap();
        });
        let reply = client.call(b"ping".to_vec(), Duration::from_secs(1)).unwrap();
        assert_eq!(reply, b"pong".to_vec());
        server.join().unwrap();
    }

    #[test]
    fn request_without_a_bound_router_is_unreachable() {
        let hub = Hub::new();
        let mut client = hub.connect_request("tcp://*:0").unwrap();
        let err = client.call(b"hi".to_vec(), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }));
    }

    #[test]
    fn request_without_a_reply_times_out() {
        let hub = Hub::new();
        let mut router = hub.bind_router("tcp://*:9998").unwrap();
        let mut client = hub.connect_request("tcp://*:9998").unwrap();
        let server = thread::spawn(move || {
            let _req = router.recv(Duration::from_secs(1)).unwrap().unwrap();
            // Never replies.
        });
        let err = client.call(b"ping".to_vec(), Duration::from_millis(50)).unwrap_err();
        assert!(err.is_timeout());
        server.join().unwrap();
    }

    #[test]
    fn publish_fans_out_to_subscribers_but_not_the_publisher() {
        let hub = Hub::new();
        let mut publisher = hub.publisher("tcp://*:5555", "replica-a").unwrap();
        let mut subscriber_a = hub.subscriber("tcp://*:5556", "replica-a").unwrap();
        let mut subscriber_b = hub.subscriber("tcp://*:5556", "replica-b").unwrap();
        subscriber_a.subscribe("servers").unwrap();
        subscriber_b.subscribe("servers").unwrap();

        publisher.publish("servers", b"hello".to_vec()).unwrap();

        assert!(subscriber_a.recv(Duration::from_millis(50)).unwrap().is_none());
        let (topic, payload) = subscriber_b.recv(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(topic, "servers");
        assert_eq!(payload, b"hello".to_vec());
    }
}
