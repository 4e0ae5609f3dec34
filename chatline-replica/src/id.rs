//! `ReplicaId` (spec.md §3: "opaque string, environment-supplied or
//! auto-generated... stable and unique"). `SERVER_NAME` overrides the
//! auto-generated form (spec.md §6).

one_two_eight::generate_id! {ReplicaIdBytes, "replica:"}

/// The stable identity a replica presents to the Registry, its peers, and
/// its own replication frames. Wraps a plain `String` rather than
/// [`ReplicaIdBytes`] directly, since `SERVER_NAME` may supply any string,
/// not just one of this crate's own minting.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// `SERVER_NAME`, if set; otherwise a freshly minted 128-bit id rendered
    /// in [`ReplicaIdBytes`]'s human-readable form.
    pub fn from_env_or_generate() -> Self {
        match std::env::var("SERVER_NAME") {
            Ok(name) if !name.is_empty() => ReplicaId(name),
            _ => Self::generate(),
        }
    }

    pub fn generate() -> Self {
        let bytes = ReplicaIdBytes::generate().expect("/dev/urandom must be readable at startup");
        ReplicaId(bytes.human_readable())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReplicaId {
    fn from(s: String) -> Self {
        ReplicaId(s)
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        std::env::set_var("SERVER_NAME", "replica-under-test");
        assert_eq!("replica-under-test", ReplicaId::from_env_or_generate().as_str());
        std::env::remove_var("SERVER_NAME");
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ReplicaId::generate();
        let b = ReplicaId::generate();
        assert_ne!(a, b);
    }
}
