//! chatline-storage is the write log collaborator each replica keeps behind
//! its request pipeline: a keyed store of known users and channels, and an
//! append-only log of delivered messages.
//!
//! Two implementations are provided.  [`InMemoryWriteLog`] is used by tests
//! and by replicas that are not configured with a data directory.
//! [`FileWriteLog`] persists the same state to disk: `users.json` and
//! `channels.json` are rewritten in full on every mutation (write to a
//! sibling temp file, then rename into place), and `messages.jsonl` is
//! appended to, one record per line.  Both mirror the shape of
//! `servidor.py`'s `load_data`/`save_data` pair without committing to its
//! exact file format.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use biometrics::{Collector, Counter};
use chatline_wire::{Error, Map, Value};
use utf8path::Path;

static USERS_INSERTED: Counter = Counter::new("chatline_storage.users_inserted");
static CHANNELS_INSERTED: Counter = Counter::new("chatline_storage.channels_inserted");
static MESSAGES_APPENDED: Counter = Counter::new("chatline_storage.messages_appended");

/// Register this crate's counters with `collector`.  Called once from each
/// server binary's `main`, alongside every other linked crate's
/// `register_biometrics`.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&USERS_INSERTED);
    collector.register_counter(&CHANNELS_INSERTED);
    collector.register_counter(&MESSAGES_APPENDED);
}

/////////////////////////////////////////////// MessageLogEntry //////////////////////////////////////////////

/// A single record appended to the message log.  `channel_publish` covers the
/// `publish` service; `private_message` covers `message`.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageLogEntry {
    ChannelPublish {
        channel: String,
        user: String,
        message: String,
        timestamp: String,
        clock: u64,
    },
    PrivateMessage {
        src: String,
        dst: String,
        message: String,
        timestamp: String,
        clock: u64,
    },
}

impl From<&MessageLogEntry> for Value {
    fn from(entry: &MessageLogEntry) -> Value {
        match entry {
            MessageLogEntry::ChannelPublish {
                channel,
                user,
                message,
                timestamp,
                clock,
            } => Map::new()
                .with("kind", "channel")
                .with("channel", channel.as_str())
                .with("user", user.as_str())
                .with("message", message.as_str())
                .with("timestamp", timestamp.as_str())
                .with("clock", *clock)
                .into(),
            MessageLogEntry::PrivateMessage {
                src,
                dst,
                message,
                timestamp,
                clock,
            } => Map::new()
                .with("kind", "private")
                .with("src", src.as_str())
                .with("dst", dst.as_str())
                .with("message", message.as_str())
                .with("timestamp", timestamp.as_str())
                .with("clock", *clock)
                .into(),
        }
    }
}

/////////////////////////////////////////////// WriteLog //////////////////////////////////////////////

/// The storage seam behind the request pipeline (spec.md §6).  Every method
/// is keyed on a name so that concurrent replicas converging on the same
/// disjoint write (e.g. two `login`s for the same user racing each other)
/// observe a single winner.
pub trait WriteLog: Send + Sync {
    /// Insert `user` if it is not already present.  Returns `true` if this
    /// call performed the insert, `false` if the user already existed.
    fn insert_user_if_absent(&self, user: &str) -> Result<bool, Error>;

    /// Insert `channel` if it is not already present.  Returns `true` if
    /// this call performed the insert, `false` if the channel already
    /// existed.
    fn insert_channel_if_absent(&self, channel: &str) -> Result<bool, Error>;

    /// Append `entry` to the message log.  Duplicates are permitted; the
    /// log is a record of what was delivered, not a deduplicated set.
    fn append_message(&self, entry: MessageLogEntry) -> Result<(), Error>;

    /// All known users, in an unspecified but stable order.
    fn list_users(&self) -> Vec<String>;

    /// All known channels, in an unspecified but stable order.
    fn list_channels(&self) -> Vec<String>;
}

/////////////////////////////////////////////// InMemoryWriteLog //////////////////////////////////////////////

/// A [`WriteLog`] backed entirely by in-memory collections.  Nothing
/// survives a process restart; this is the write log a replica falls back
/// to when it has no data directory configured.
#[derive(Default)]
pub struct InMemoryWriteLog {
    users: Mutex<BTreeSet<String>>,
    channels: Mutex<BTreeSet<String>>,
    messages: Mutex<Vec<MessageLogEntry>>,
}

impl InMemoryWriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every message appended so far, in append order.  Not
    /// part of the [`WriteLog`] trait because `FileWriteLog` does not keep
    /// the whole log resident; tests and the in-process demo use it
    /// directly on the concrete type.
    pub fn messages(&self) -> Vec<MessageLogEntry> {
        self.messages.lock().unwrap().clone()
    }
}

impl WriteLog for InMemoryWriteLog {
    fn insert_user_if_absent(&self, user: &str) -> Result<bool, Error> {
        let inserted = self.users.lock().unwrap().insert(user.to_string());
        if inserted {
            USERS_INSERTED.click();
        }
        Ok(inserted)
    }

    fn insert_channel_if_absent(&self, channel: &str) -> Result<bool, Error> {
        let inserted = self.channels.lock().unwrap().insert(channel.to_string());
        if inserted {
            CHANNELS_INSERTED.click();
        }
        Ok(inserted)
    }

    fn append_message(&self, entry: MessageLogEntry) -> Result<(), Error> {
        self.messages.lock().unwrap().push(entry);
        MESSAGES_APPENDED.click();
        Ok(())
    }

    fn list_users(&self) -> Vec<String> {
        self.users.lock().unwrap().iter().cloned().collect()
    }

    fn list_channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().iter().cloned().collect()
    }
}

/////////////////////////////////////////////// FileWriteLog //////////////////////////////////////////////

/// A [`WriteLog`] that persists to a data directory: `users.json` and
/// `channels.json` hold the full set each, rewritten atomically on every
/// insert; `messages.jsonl` is opened in append mode and never rewritten.
///
/// The on-disk encoding is the [`Value`] `Display` form, one value per file
/// (the object files) or one value per line (the message log).  It is not a
/// wire format and no other process is expected to read it; only the
/// human-inspectable shape matters.
pub struct FileWriteLog {
    dir: Path<'static>,
    users: Mutex<BTreeSet<String>>,
    channels: Mutex<BTreeSet<String>>,
}

impl FileWriteLog {
    /// Open (creating if absent) a write log rooted at `dir`.  Existing
    /// `users.json`/`channels.json` are loaded into memory; `messages.jsonl`
    /// is left untouched, since it is never read back by this type.
    pub fn open(dir: impl Into<Path<'static>>) -> Result<Self, Error> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.into_std())?;
        let users = load_name_set(&dir.join("users.json"))?;
        let channels = load_name_set(&dir.join("channels.json"))?;
        Ok(Self {
            dir,
            users: Mutex::new(users),
            channels: Mutex::new(channels),
        })
    }

    fn users_path(&self) -> Path<'static> {
        self.dir.join("users.json").into_owned()
    }

    fn channels_path(&self) -> Path<'static> {
        self.dir.join("channels.json").into_owned()
    }

    fn messages_path(&self) -> Path<'static> {
        self.dir.join("messages.jsonl").into_owned()
    }
}

fn load_name_set(path: &Path<'static>) -> Result<BTreeSet<String>, Error> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let contents = std::fs::read_to_string(path.into_std())?;
    Ok(contents.lines().map(|line| line.to_string()).collect())
}

fn rewrite_name_set(path: &Path<'static>, names: &BTreeSet<String>) -> Result<(), Error> {
    let tmp = format!("{}.tmp", path.as_str());
    let tmp_path = Path::from(tmp.clone());
    {
        let mut f = File::create(tmp_path.into_std())?;
        for name in names {
            writeln!(f, "{name}")?;
        }
        f.sync_all()?;
    }
    std::fs::rename(tmp_path.into_std(), path.into_std())?;
    Ok(())
}

impl WriteLog for FileWriteLog {
    fn insert_user_if_absent(&self, user: &str) -> Result<bool, Error> {
        let mut users = self.users.lock().unwrap();
        if !users.insert(user.to_string()) {
            return Ok(false);
        }
        rewrite_name_set(&self.users_path(), &users)?;
        USERS_INSERTED.click();
        Ok(true)
    }

    fn insert_channel_if_absent(&self, channel: &str) -> Result<bool, Error> {
        let mut channels = self.channels.lock().unwrap();
        if !channels.insert(channel.to_string()) {
            return Ok(false);
        }
        rewrite_name_set(&self.channels_path(), &channels)?;
        CHANNELS_INSERTED.click();
        Ok(true)
    }

    fn append_message(&self, entry: MessageLogEntry) -> Result<(), Error> {
        let value: Value = (&entry).into();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.messages_path().into_std())?;
        writeln!(f, "{value}")?;
        MESSAGES_APPENDED.click();
        Ok(())
    }

    fn list_users(&self) -> Vec<String> {
        self.users.lock().unwrap().iter().cloned().collect()
    }

    fn list_channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().iter().cloned().collect()
    }
}

/// Read back every message appended to `messages.jsonl` so far.  Used by
/// tests and by operators inspecting a replica's log; the replica's own
/// read path never calls this.
pub fn read_messages_jsonl(dir: impl Into<Path<'static>>) -> Result<Vec<String>, Error> {
    let path = dir.into().join("messages.jsonl").into_owned();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let f = File::open(path.into_std())?;
    let reader = BufReader::new(f);
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_insert_is_idempotent() {
        let log = InMemoryWriteLog::new();
        assert!(log.insert_user_if_absent("alice").unwrap());
        assert!(!log.insert_user_if_absent("alice").unwrap());
        assert_eq!(log.list_users(), vec!["alice".to_string()]);
    }

    #[test]
    fn in_memory_records_messages_in_order() {
        let log = InMemoryWriteLog::new();
        log.append_message(MessageLogEntry::ChannelPublish {
            channel: "general".to_string(),
            user: "alice".to_string(),
            message: "hi".to_string(),
            timestamp: "t0".to_string(),
            clock: 1,
        })
        .unwrap();
        log.append_message(MessageLogEntry::PrivateMessage {
            src: "alice".to_string(),
            dst: "bob".to_string(),
            message: "yo".to_string(),
            timestamp: "t1".to_string(),
            clock: 2,
        })
        .unwrap();
        assert_eq!(log.messages().len(), 2);
    }

    #[test]
    fn file_write_log_persists_across_open() {
        let dir = std::env::temp_dir().join(format!(
            "chatline-storage-test-{:?}",
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let path: Path<'static> = dir.clone().try_into().unwrap();

        {
            let log = FileWriteLog::open(path.clone()).unwrap();
            assert!(log.insert_user_if_absent("alice").unwrap());
            assert!(log.insert_channel_if_absent("general").unwrap());
            log.append_message(MessageLogEntry::ChannelPublish {
                channel: "general".to_string(),
                user: "alice".to_string(),
                message: "hi".to_string(),
                timestamp: "t0".to_string(),
                clock: 1,
            })
            .unwrap();
        }

        let reopened = FileWriteLog::open(path.clone()).unwrap();
        assert_eq!(reopened.list_users(), vec!["alice".to_string()]);
        assert_eq!(reopened.list_channels(), vec!["general".to_string()]);
        assert_eq!(read_messages_jsonl(path).unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_insert_does_not_rewrite() {
        let dir = std::env::temp_dir().join(format!(
            "chatline-storage-test-dup-{:?}",
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let path: Path<'static> = dir.clone().try_into().unwrap();
        let log = FileWriteLog::open(path).unwrap();
        assert!(log.insert_user_if_absent("alice").unwrap());
        assert!(!log.insert_user_if_absent("alice").unwrap());
        assert_eq!(log.list_users().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
