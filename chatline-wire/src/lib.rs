//! chatline-wire provides the on-wire envelope (`{service, data}`), the
//! recursive map-of-maps [`value::Value`] payload representation, and the
//! closed set of per-service request/response shapes for the chatline
//! coordination core (spec §6).

mod error;
mod service;
mod value;

pub use error::Error;
pub use service::{names, topics, ElectionAnnouncement, ElectionRequest, Envelope, HeartbeatRequest,
    ListResponse, LoginRequest, ChannelRequest, ClockResponse, NamesResponse, PeerInfo,
    PrivateMessageRequest, PublishRequest, RankRequest, RankResponse, Status};
pub use value::{Map, Value, Values};

use buffertk::{stack_pack, Unpackable};

/// Encode an [`Envelope`] to the bytes that travel as the last frame of a
/// multi-part message (spec.md §6: "the last frame is the binary payload").
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let value: Value = envelope.clone().into();
    stack_pack(&value).to_vec()
}

/// Decode the last frame of an inbound multi-part message into an
/// [`Envelope`].
pub fn decode(buf: &[u8]) -> Result<Envelope, Error> {
    let (value, rem) = Value::unpack(buf)?;
    if !rem.is_empty() {
        return Err(Error::decode_failure("trailing bytes after envelope"));
    }
    Ok(Envelope::from(value))
}

/// The current wall-clock time as the ISO-8601 string spec.md §6 requires
/// every `data.timestamp` field to carry.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let envelope = Envelope::new(names::HEARTBEAT, "2026-01-01T00:00:00Z", 3)
            .with_field("id", "replica-a");
        let buf = encode(&envelope);
        let back = decode(&buf).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let envelope = Envelope::new(names::HEARTBEAT, "t", 1);
        let mut buf = encode(&envelope);
        buf.push(0xff);
        assert!(decode(&buf).is_err());
    }
}
