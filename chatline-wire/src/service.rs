//! Typed request/response payloads for the closed set of services named in
//! spec.md §6, plus the envelope they travel in. Every payload converts
//! to/from [`Map`] rather than being accessed through `.get(key, default)` at
//! the call site (the "tagged variants" redesign flag).

use crate::error::Error;
use crate::value::{Map, Value};

/// Service name constants. These are the only strings ever placed in
/// [`Envelope::service`].
pub mod names {
    pub const RANK: &str = "rank";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const LIST: &str = "list";
    pub const ELECTION: &str = "election";
    pub const CLOCK: &str = "clock";
    pub const LOGIN: &str = "login";
    pub const CHANNEL: &str = "channel";
    pub const USERS: &str = "users";
    pub const CHANNELS: &str = "channels";
    pub const PUBLISH: &str = "publish";
    pub const MESSAGE: &str = "message";
    pub const ERRO: &str = "erro";
}

/// Topic name constants used on the PubSub Proxy.
pub mod topics {
    pub const SERVERS: &str = "servers";
    pub const REPLICATION: &str = "replication";

    pub fn user(dst: &str) -> String {
        format!("user:{dst}")
    }
}

///////////////////////////////////////////// Envelope /////////////////////////////////////////////

/// The on-wire frame: `{service, data: {timestamp, clock, ...}}`, per spec.md
/// §6. `data` always carries `timestamp` and `clock`; everything else is
/// service-specific and lives in the remaining map entries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Envelope {
    pub service: String,
    pub data: Map,
}

impl Envelope {
    pub fn new(service: impl Into<String>, timestamp: impl Into<String>, clock: u64) -> Self {
        let data = Map::new().with("timestamp", timestamp.into()).with("clock", clock);
        Self {
            service: service.into(),
            data,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key, value);
        self
    }

    pub fn clock(&self) -> u64 {
        self.data.get_u64("clock").unwrap_or(0)
    }

    pub fn timestamp(&self) -> &str {
        self.data.get_str("timestamp").unwrap_or("")
    }

    pub fn field(&self, key: &str) -> Result<&Value, Error> {
        self.data.get(key).ok_or_else(|| Error::missing_field(key))
    }

    pub fn string_field(&self, key: &str) -> Result<&str, Error> {
        self.field(key)?
            .as_str()
            .ok_or_else(|| Error::missing_field(key))
    }

    pub fn u64_field(&self, key: &str) -> Result<u64, Error> {
        self.field(key)?
            .as_u64()
            .ok_or_else(|| Error::missing_field(key))
    }

    pub fn erro(timestamp: impl Into<String>, clock: u64, description: impl Into<String>) -> Self {
        Envelope::new(names::ERRO, timestamp, clock)
            .with_field("status", "erro")
            .with_field("description", description.into())
    }
}

impl From<Value> for Envelope {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let service = map.get_str("service").unwrap_or_default().to_string();
                let data = map.get("data").and_then(Value::as_object).cloned().unwrap_or_default();
                Self { service, data }
            }
            _ => Self::default(),
        }
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        Map::new()
            .with("service", envelope.service)
            .with("data", Value::Object(envelope.data))
            .into()
    }
}

///////////////////////////////////////////// PeerInfo //////////////////////////////////////////////

/// One entry of the Active Peer List (spec.md §3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerInfo {
    pub id: String,
    pub rank: u64,
    pub endpoint: String,
}

impl From<&PeerInfo> for Value {
    fn from(peer: &PeerInfo) -> Self {
        Map::new()
            .with("id", peer.id.clone())
            .with("rank", peer.rank)
            .with("endpoint", peer.endpoint.clone())
            .into()
    }
}

impl TryFrom<&Value> for PeerInfo {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Error> {
        let map = value.as_object().ok_or_else(|| Error::missing_field("peer"))?;
        Ok(PeerInfo {
            id: map.get_str("id").ok_or_else(|| Error::missing_field("id"))?.to_string(),
            rank: map.get_u64("rank").ok_or_else(|| Error::missing_field("rank"))?,
            endpoint: map
                .get_str("endpoint")
                .ok_or_else(|| Error::missing_field("endpoint"))?
                .to_string(),
        })
    }
}

///////////////////////////////////////////// rank //////////////////////////////////////////////////

pub struct RankRequest {
    pub id: String,
    pub endpoint: String,
}

impl RankRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            id: envelope.string_field("id")?.to_string(),
            endpoint: envelope.string_field("endpoint")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("id", self.id).with_field("endpoint", self.endpoint)
    }
}

pub struct RankResponse {
    pub rank: u64,
}

impl RankResponse {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            rank: envelope.u64_field("rank")?,
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("rank", self.rank)
    }
}

///////////////////////////////////////////// heartbeat /////////////////////////////////////////////

pub struct HeartbeatRequest {
    pub id: String,
}

impl HeartbeatRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            id: envelope.string_field("id")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("id", self.id)
    }
}

///////////////////////////////////////////// list //////////////////////////////////////////////////

pub struct ListResponse {
    pub peers: Vec<PeerInfo>,
}

impl ListResponse {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        let list = envelope.field("list")?.as_array().ok_or_else(|| Error::missing_field("list"))?;
        let peers = list.iter().map(PeerInfo::try_from).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { peers })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        let list: Vec<Value> = self.peers.iter().map(Value::from).collect();
        envelope.with_field("list", list)
    }
}

///////////////////////////////////////////// election //////////////////////////////////////////////

pub struct ElectionRequest {
    pub rank: u64,
}

impl ElectionRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            rank: envelope.u64_field("rank")?,
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("rank", self.rank)
    }
}

pub struct ElectionAnnouncement {
    pub coordinator: String,
}

impl ElectionAnnouncement {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            coordinator: envelope.string_field("coordinator")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("coordinator", self.coordinator)
    }
}

///////////////////////////////////////////// clock //////////////////////////////////////////////////

pub struct ClockResponse {
    pub time: u64,
}

impl ClockResponse {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            time: envelope.u64_field("time")?,
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("time", self.time)
    }
}

///////////////////////////////////////////// login //////////////////////////////////////////////////

pub struct LoginRequest {
    pub user: String,
}

impl LoginRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            user: envelope.string_field("user")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("user", self.user)
    }
}

///////////////////////////////////////////// channel ////////////////////////////////////////////////

pub struct ChannelRequest {
    pub channel: String,
}

impl ChannelRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            channel: envelope.string_field("channel")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope.with_field("channel", self.channel)
    }
}

///////////////////////////////////////////// users / channels ///////////////////////////////////////

pub struct NamesResponse {
    pub names: Vec<String>,
}

impl NamesResponse {
    pub fn from_envelope(envelope: &Envelope, field: &str) -> Result<Self, Error> {
        let values = envelope.field(field)?.as_array().ok_or_else(|| Error::missing_field(field))?;
        let names = values
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(|| Error::missing_field(field)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names })
    }

    pub fn apply_to(self, envelope: Envelope, field: &str) -> Envelope {
        let values: Vec<Value> = self.names.into_iter().map(Value::from).collect();
        envelope.with_field(field, values)
    }
}

///////////////////////////////////////////// publish ////////////////////////////////////////////////

pub struct PublishRequest {
    pub channel: String,
    pub user: String,
    pub message: String,
}

impl PublishRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            channel: envelope.string_field("channel")?.to_string(),
            user: envelope.string_field("user")?.to_string(),
            message: envelope.string_field("message")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope
            .with_field("channel", self.channel)
            .with_field("user", self.user)
            .with_field("message", self.message)
    }
}

///////////////////////////////////////////// message ////////////////////////////////////////////////

pub struct PrivateMessageRequest {
    pub dst: String,
    pub src: String,
    pub message: String,
}

impl PrivateMessageRequest {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            dst: envelope.string_field("dst")?.to_string(),
            src: envelope.string_field("src")?.to_string(),
            message: envelope.string_field("message")?.to_string(),
        })
    }

    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        envelope
            .with_field("dst", self.dst)
            .with_field("src", self.src)
            .with_field("message", self.message)
    }
}

///////////////////////////////////////////// status /////////////////////////////////////////////////

/// Every write service replies with a status, success or otherwise, embedded
/// in `data` alongside the service's own fields.
pub enum Status {
    Ok,
    Erro(String),
}

impl Status {
    pub fn apply_to(self, envelope: Envelope) -> Envelope {
        match self {
            Status::Ok => envelope.with_field("status", "ok"),
            Status::Erro(description) => envelope
                .with_field("status", "erro")
                .with_field("description", description),
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Self {
        match envelope.string_field("status") {
            Ok("ok") => Status::Ok,
            _ => Status::Erro(
                envelope
                    .string_field("description")
                    .unwrap_or("erro")
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_value() {
        let envelope = Envelope::new(names::RANK, "2026-01-01T00:00:00Z", 5)
            .with_field("id", "replica-a")
            .with_field("endpoint", "tcp://a:5570");
        let value: Value = envelope.clone().into();
        let back = Envelope::from(value);
        assert_eq!(envelope, back);
    }

    #[test]
    fn list_response_round_trips() {
        let peers = vec![
            PeerInfo {
                id: "a".to_string(),
                rank: 1,
                endpoint: "tcp://a:1".to_string(),
            },
            PeerInfo {
                id: "b".to_string(),
                rank: 2,
                endpoint: "tcp://b:1".to_string(),
            },
        ];
        let envelope = ListResponse { peers }.apply_to(Envelope::new(names::LIST, "t", 1));
        let parsed = ListResponse::from_envelope(&envelope).unwrap();
        assert_eq!(2, parsed.peers.len());
        assert_eq!("a", parsed.peers[0].id);
        assert_eq!(2, parsed.peers[1].rank);
    }
}
