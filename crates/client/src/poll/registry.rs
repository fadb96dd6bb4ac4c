//! Concurrent registry of sessions served by a poll thread.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::session::{Session, SessionId};

/// A registered session and the poll thread's handle on its socket.
///
/// The entry owns a duplicate of the session's socket descriptor, so the key
/// stays valid (and unique) for as long as any snapshot holds the entry.
#[derive(Debug)]
pub struct RegistryEntry {
    poll_socket: OwnedFd,
    session_id: SessionId,
    session: Weak<Session>,
}

impl RegistryEntry {
    pub fn new(poll_socket: OwnedFd, session: &Arc<Session>) -> Self {
        Self {
            poll_socket,
            session_id: session.id().clone(),
            session: Arc::downgrade(session),
        }
    }

    /// Registry key: the raw descriptor of the poll socket.
    pub fn key(&self) -> RawFd {
        self.poll_socket.as_raw_fd()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The session, if its owner has not dropped it.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }
}

impl AsFd for RegistryEntry {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.poll_socket.as_fd()
    }
}

/// Sessions keyed by poll socket, safe for concurrent add, remove and
/// enumeration.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: DashMap<RawFd, Arc<RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry. Returns false if its key is already registered.
    pub fn insert(&self, entry: Arc<RegistryEntry>) -> bool {
        match self.entries.entry(entry.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Removes the entry with `key`, returning it if present.
    pub fn remove(&self, key: RawFd) -> Option<Arc<RegistryEntry>> {
        self.entries.remove(&key).map(|(_, entry)| entry)
    }

    pub fn contains(&self, key: RawFd) -> bool {
        self.entries.contains_key(&key)
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> Vec<Arc<RegistryEntry>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
