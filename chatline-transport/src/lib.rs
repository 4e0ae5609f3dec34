//! chatline-transport names the socket modes spec.md §6 treats as an
//! external collaborator ("a reliable message-oriented socket library
//! providing REQ/REP, ROUTER/DEALER, and PUB/SUB semantics") as a small trait
//! set, per the "Polymorphism over socket modes" redesign flag in spec.md
//! §9: the coordination core in `chatline-registry`/`chatline-replica`
//! depends only on these traits, never on a concrete socket library.
//!
//! [`inproc`] provides the one concrete implementation this workspace ships:
//! an in-process hub good enough to run every component (Command Broker,
//! PubSub Proxy, Registry, replica P2P listeners) in a single process, with
//! the same framing and topic semantics a real ROUTER/DEALER/XSUB/XPUB
//! deployment would have. [`broker`] builds the two external-collaborator
//! broker processes (spec.md §2) on top of the trait set.

mod error;
pub mod broker;
pub mod inproc;

pub use error::Error;

use std::time::Duration;

/// Opaque per-connection identity a [`Router`] hands back with each inbound
/// request, so a reply can be routed to the correct caller. Mirrors the
/// identity frame a real ROUTER socket prepends to each message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Identity(pub u64);

/// One request received on a [`Router`], paired with the identity needed to
/// reply to it.
#[derive(Clone, Debug)]
pub struct RouterRequest {
    pub identity: Identity,
    pub payload: Vec<u8>,
}

/// A REQ-like socket: exactly one outstanding request at a time, with an
/// explicit deadline (spec.md §5: "election RPCs carry explicit send+receive
/// timeouts").
pub trait RequestChannel: Send {
    /// Send `payload` and block for a reply, or [`Error::Timeout`] once
    /// `timeout` elapses without one arriving.
    fn call(&mut self, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, Error>;
}

/// A ROUTER-like socket: many callers, each request tagged with the
/// [`Identity`] a reply must be addressed back to. Used by the Registry
/// (spec.md §4.1) and the replica P2P listener's ROUTER face (spec.md §4.3).
pub trait Router: Send {
    /// Block for up to `timeout` for the next inbound request.
    /// `Ok(None)` means the deadline elapsed with nothing to do; this is the
    /// normal, expected outcome of one iteration of a poll loop.
    fn recv(&mut self, timeout: Duration) -> Result<Option<RouterRequest>, Error>;

    /// Reply to the caller identified by `identity`. A caller that has
    /// already given up (timed out) silently drops the reply, matching a
    /// real ROUTER socket's fire-and-forget send.
    fn reply(&mut self, identity: Identity, payload: Vec<u8>) -> Result<(), Error>;
}

/// The publishing face of the PubSub Proxy (spec.md §6): one frame per
/// `publish` call, tagged with the topic it is fanned out under.
pub trait TopicPublisher: Send {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), Error>;
}

/// The subscribing face of the PubSub Proxy. A subscriber never receives a
/// frame published by a publisher handle carrying its own identity (spec.md
/// §9 open question 1, resolved in SPEC_FULL.md: "the originator does not
/// resubscribe to its own publish").
pub trait TopicSubscriber: Send {
    fn subscribe(&mut self, topic: &str) -> Result<(), Error>;

    /// Block for up to `timeout` for the next frame on any subscribed topic.
    fn recv(&mut self, timeout: Duration) -> Result<Option<(String, Vec<u8>)>, Error>;
}

/// Binds and connects every socket mode the core needs, keyed by the
/// identity this process presents on the wire (a [`Router`]'s connecting
/// peers never see it; a publisher/subscriber pair does, for self-filtering
/// on loopback topics).
pub trait Transport: Send + Sync {
    fn connect_request(&self, endpoint: &str) -> Result<Box<dyn RequestChannel>, Error>;

    fn bind_router(&self, endpoint: &str) -> Result<Box<dyn Router>, Error>;

    fn publisher(&self, endpoint: &str, identity: &str) -> Result<Box<dyn TopicPublisher>, Error>;

    fn subscriber(&self, endpoint: &str, identity: &str) -> Result<Box<dyn TopicSubscriber>, Error>;
}
