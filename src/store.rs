//! Identity and settings persistence.
//!
//! The engine only needs durable numeric ids for nicknames and channel
//! names, plus string settings scoped to a server, user or channel. The
//! store is the one resource shared between connections, so implementors
//! must be `Send + Sync` and make each call individually atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Configured server id.
pub type ServerId = u64;

/// Durable id of a nickname on one server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserId(pub u64);

/// Durable id of a channel on one server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelId(pub u64);

/// What a setting is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SettingScope {
    Server(ServerId),
    User(UserId),
    Channel(ChannelId),
}

/// Identity and settings backend.
///
/// Names passed in are already case-folded by the caller.
pub trait IdentityStore: Send + Sync {
    fn get_or_create_user_id(&self, server: ServerId, nickname: &str) -> UserId;

    fn get_or_create_channel_id(&self, server: ServerId, name: &str) -> ChannelId;

    fn get_setting(&self, scope: SettingScope, key: &str) -> Option<String>;

    fn set_setting(&self, scope: SettingScope, key: &str, value: &str);

    fn delete_setting(&self, scope: SettingScope, key: &str);
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    users: HashMap<(ServerId, String), UserId>,
    channels: HashMap<(ServerId, String), ChannelId>,
    settings: HashMap<(SettingScope, String), String>,
}

impl Tables {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process [`IdentityStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdentityStore for MemoryStore {
    fn get_or_create_user_id(&self, server: ServerId, nickname: &str) -> UserId {
        let mut tables = self.tables();
        let key = (server, nickname.to_owned());
        if let Some(id) = tables.users.get(&key) {
            return *id;
        }
        let id = UserId(tables.allocate());
        tables.users.insert(key, id);
        id
    }

    fn get_or_create_channel_id(&self, server: ServerId, name: &str) -> ChannelId {
        let mut tables = self.tables();
        let key = (server, name.to_owned());
        if let Some(id) = tables.channels.get(&key) {
            return *id;
        }
        let id = ChannelId(tables.allocate());
        tables.channels.insert(key, id);
        id
    }

    fn get_setting(&self, scope: SettingScope, key: &str) -> Option<String> {
        self.tables()
            .settings
            .get(&(scope, key.to_owned()))
            .cloned()
    }

    fn set_setting(&self, scope: SettingScope, key: &str, value: &str) {
        self.tables()
            .settings
            .insert((scope, key.to_owned()), value.to_owned());
    }

    fn delete_setting(&self, scope: SettingScope, key: &str) {
        self.tables().settings.remove(&(scope, key.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable_per_server() {
        let store = MemoryStore::new();
        let a = store.get_or_create_user_id(1, "alice");
        assert_eq!(store.get_or_create_user_id(1, "alice"), a);
        assert_ne!(store.get_or_create_user_id(2, "alice"), a);
        assert_ne!(store.get_or_create_user_id(1, "bob"), a);

        let c = store.get_or_create_channel_id(1, "#rust");
        assert_eq!(store.get_or_create_channel_id(1, "#rust"), c);
    }

    #[test]
    fn test_settings_scoped() {
        let store = MemoryStore::new();
        store.set_setting(SettingScope::Server(1), "encoding", "latin1");
        store.set_setting(SettingScope::Channel(ChannelId(1)), "encoding", "utf-8");

        assert_eq!(
            store.get_setting(SettingScope::Server(1), "encoding").as_deref(),
            Some("latin1")
        );
        store.delete_setting(SettingScope::Server(1), "encoding");
        assert_eq!(store.get_setting(SettingScope::Server(1), "encoding"), None);
        assert!(store
            .get_setting(SettingScope::Channel(ChannelId(1)), "encoding")
            .is_some());
    }
}
