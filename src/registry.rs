//! Users and channels known on one connection.
//!
//! Entities are addressed by their case-folded name under the server's
//! [`CaseMapping`]; cross references between users and channels are folded
//! keys, never pointers. A user's channel set and a channel's member set are
//! kept mutually consistent by every mutator here.
//!
//! Users created from an incidental reference (a message sender, a WHO
//! reply) are *transient*: [`EntityRegistry::prune_transient_users`] drops
//! any that ended the read cycle without a tracked channel membership.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::casemap::CaseMapping;
use crate::error::{EngineError, Result};
use crate::store::{ChannelId, IdentityStore, ServerId, UserId};

/// Channel type prefixes assumed before `CHANTYPES` is seen.
pub const DEFAULT_CHANNEL_TYPES: &str = "#";

/// A nickname seen on this connection.
#[derive(Clone, Debug)]
pub struct User {
    nickname: String,
    key: String,
    id: UserId,
    channels: HashSet<String>,
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub buffer: Buffer,
}

impl User {
    fn new(nickname: &str, key: String, id: UserId) -> Self {
        Self {
            nickname: nickname.to_owned(),
            key,
            id,
            channels: HashSet::new(),
            username: None,
            hostname: None,
            buffer: Buffer::default(),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Case-folded lookup key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Durable identity of the current nickname.
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Folded names of the channels this user occupies.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// A channel seen on this connection.
#[derive(Clone, Debug)]
pub struct Channel {
    name: String,
    key: String,
    id: ChannelId,
    /// Member key to the prefix modes it holds (`o`, `v`, ...).
    members: HashMap<String, String>,
    pub topic: Option<String>,
    pub buffer: Buffer,
}

impl Channel {
    fn new(name: &str, key: String, id: ChannelId) -> Self {
        Self {
            name: name.to_owned(),
            key,
            id,
            members: HashMap::new(),
            topic: None,
            buffer: Buffer::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Folded nicknames of the members.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_member_key(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }

    /// Prefix modes held by a member, by folded nickname.
    pub fn member_modes(&self, key: &str) -> Option<&str> {
        self.members.get(key).map(String::as_str)
    }

    /// Grant or revoke a prefix mode for a member.
    pub fn set_member_mode(&mut self, key: &str, mode: char, enabled: bool) {
        if let Some(modes) = self.members.get_mut(key) {
            let has = modes.contains(mode);
            if enabled && !has {
                modes.push(mode);
            } else if !enabled && has {
                modes.retain(|c| c != mode);
            }
        }
    }
}

/// Notifications produced while resolving entities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    NewUser { id: UserId, nickname: String },
    NewChannel { id: ChannelId, name: String },
}

/// Case-folded users and channels for one connection.
pub struct EntityRegistry {
    server: ServerId,
    store: Arc<dyn IdentityStore>,
    case_mapping: CaseMapping,
    channel_types: Vec<char>,
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
    new_users: HashSet<String>,
    events: Vec<RegistryEvent>,
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("server", &self.server)
            .field("case_mapping", &self.case_mapping)
            .field("users", &self.users.len())
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl EntityRegistry {
    pub fn new(server: ServerId, store: Arc<dyn IdentityStore>) -> Self {
        Self {
            server,
            store,
            case_mapping: CaseMapping::default(),
            channel_types: DEFAULT_CHANNEL_TYPES.chars().collect(),
            users: HashMap::new(),
            channels: HashMap::new(),
            new_users: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn case_mapping(&self) -> CaseMapping {
        self.case_mapping
    }

    /// Switch case mapping, re-keying every entity and cross reference.
    pub fn set_case_mapping(&mut self, mapping: CaseMapping) {
        if mapping == self.case_mapping {
            return;
        }
        self.case_mapping = mapping;

        let user_keys: HashMap<String, String> = self
            .users
            .iter()
            .map(|(key, user)| (key.clone(), mapping.to_lower(&user.nickname)))
            .collect();
        let channel_keys: HashMap<String, String> = self
            .channels
            .iter()
            .map(|(key, channel)| (key.clone(), mapping.to_lower(&channel.name)))
            .collect();

        self.users = std::mem::take(&mut self.users)
            .into_values()
            .map(|mut user| {
                user.key = mapping.to_lower(&user.nickname);
                user.channels = user
                    .channels
                    .iter()
                    .filter_map(|k| channel_keys.get(k).cloned())
                    .collect();
                (user.key.clone(), user)
            })
            .collect();

        self.channels = std::mem::take(&mut self.channels)
            .into_values()
            .map(|mut channel| {
                channel.key = mapping.to_lower(&channel.name);
                channel.members = std::mem::take(&mut channel.members)
                    .into_iter()
                    .filter_map(|(k, modes)| user_keys.get(&k).map(|nk| (nk.clone(), modes)))
                    .collect();
                (channel.key.clone(), channel)
            })
            .collect();

        self.new_users = std::mem::take(&mut self.new_users)
            .into_iter()
            .filter_map(|k| user_keys.get(&k).cloned())
            .collect();
    }

    pub fn channel_types(&self) -> &[char] {
        &self.channel_types
    }

    /// Replace the channel type prefixes (`CHANTYPES`).
    pub fn set_channel_types(&mut self, types: &str) {
        if !types.is_empty() {
            self.channel_types = types.chars().collect();
        }
    }

    /// Fold a name under the current case mapping.
    pub fn fold(&self, name: &str) -> String {
        self.case_mapping.to_lower(name)
    }

    /// Whether `name` starts with a channel type prefix.
    pub fn is_channel_name(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.channel_types.contains(&c))
    }

    pub fn has_user(&self, nickname: &str) -> bool {
        self.users.contains_key(&self.fold(nickname))
    }

    pub fn user(&self, nickname: &str) -> Option<&User> {
        self.users.get(&self.fold(nickname))
    }

    pub fn user_mut(&mut self, nickname: &str) -> Option<&mut User> {
        let key = self.fold(nickname);
        self.users.get_mut(&key)
    }

    /// Look up a user, creating a transient one when `create` is set.
    pub fn get_user(&mut self, nickname: &str, create: bool) -> Option<&mut User> {
        let key = self.fold(nickname);
        if !self.users.contains_key(&key) {
            if !create || nickname.is_empty() {
                return None;
            }
            let id = self.store.get_or_create_user_id(self.server, &key);
            tracing::trace!(server = self.server, nickname, ?id, "new user");
            self.events.push(RegistryEvent::NewUser {
                id,
                nickname: nickname.to_owned(),
            });
            self.new_users.insert(key.clone());
            self.users
                .insert(key.clone(), User::new(nickname, key.clone(), id));
        }
        self.users.get_mut(&key)
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.is_channel_name(name) && self.channels.contains_key(&self.fold(name))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&self.fold(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        let key = self.fold(name);
        self.channels.get_mut(&key)
    }

    /// Look up a channel, creating it on first reference.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidChannelName`] when `name` lacks a channel type
    /// prefix.
    pub fn get_channel(&mut self, name: &str) -> Result<&mut Channel> {
        if !self.is_channel_name(name) {
            return Err(EngineError::InvalidChannelName(name.to_owned()));
        }
        let key = self.fold(name);
        if !self.channels.contains_key(&key) {
            let id = self.store.get_or_create_channel_id(self.server, &key);
            tracing::trace!(server = self.server, channel = name, ?id, "new channel");
            self.events.push(RegistryEvent::NewChannel {
                id,
                name: name.to_owned(),
            });
            self.channels
                .insert(key.clone(), Channel::new(name, key.clone(), id));
        }
        self.channels
            .get_mut(&key)
            .ok_or_else(|| EngineError::UnknownChannel(name.to_owned()))
    }

    /// Record that `nickname` joined `channel`, creating either as needed.
    pub fn join(&mut self, nickname: &str, channel: &str, modes: &str) -> Result<()> {
        let channel_key = self.get_channel(channel)?.key.clone();
        let user_key = match self.get_user(nickname, true) {
            Some(user) => {
                user.channels.insert(channel_key.clone());
                user.key.clone()
            }
            None => return Err(EngineError::UnknownUser(nickname.to_owned())),
        };
        if let Some(channel) = self.channels.get_mut(&channel_key) {
            channel.members.insert(user_key, modes.to_owned());
        }
        Ok(())
    }

    /// Record that `nickname` left `channel`.
    pub fn part(&mut self, nickname: &str, channel: &str) {
        let user_key = self.fold(nickname);
        let channel_key = self.fold(channel);
        if let Some(user) = self.users.get_mut(&user_key) {
            user.channels.remove(&channel_key);
        }
        if let Some(channel) = self.channels.get_mut(&channel_key) {
            channel.members.remove(&user_key);
        }
    }

    /// Remove a user and its memberships.
    pub fn remove_user(&mut self, nickname: &str) -> Option<User> {
        let key = self.fold(nickname);
        let user = self.users.remove(&key)?;
        for channel_key in &user.channels {
            if let Some(channel) = self.channels.get_mut(channel_key) {
                channel.members.remove(&key);
            }
        }
        self.new_users.remove(&key);
        Some(user)
    }

    /// Remove a channel, parting every member from it first.
    pub fn remove_channel(&mut self, name: &str) -> Option<Channel> {
        let key = self.fold(name);
        let channel = self.channels.remove(&key)?;
        for member in channel.members.keys() {
            if let Some(user) = self.users.get_mut(member) {
                user.channels.remove(&key);
            }
        }
        Some(channel)
    }

    /// Re-key a channel under a new name.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownChannel`] when `old` is not tracked, and
    /// [`EngineError::InvariantViolation`] when `new` names another tracked
    /// channel. Nothing changes on error.
    pub fn rename_channel(&mut self, old: &str, new: &str) -> Result<()> {
        let old_key = self.fold(old);
        let new_key = self.fold(new);
        if new_key != old_key && self.channels.contains_key(&new_key) {
            return Err(EngineError::InvariantViolation(format!(
                "cannot rename channel {} to {}: name already tracked",
                old, new
            )));
        }
        let mut channel = self
            .channels
            .remove(&old_key)
            .ok_or_else(|| EngineError::UnknownChannel(old.to_owned()))?;
        channel.name = new.to_owned();
        channel.key = new_key.clone();
        for member in channel.members.keys() {
            if let Some(user) = self.users.get_mut(member) {
                user.channels.remove(&old_key);
                user.channels.insert(new_key.clone());
            }
        }
        self.channels.insert(new_key, channel);
        Ok(())
    }

    /// Re-key a user under a new nickname and re-resolve its identity.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownUser`] when `old` is not tracked, and
    /// [`EngineError::InvariantViolation`] when `new` names another tracked
    /// user. Nothing changes on error.
    pub fn change_user_nickname(&mut self, old: &str, new: &str) -> Result<()> {
        let old_key = self.fold(old);
        let new_key = self.fold(new);
        if new_key != old_key && self.users.contains_key(&new_key) {
            return Err(EngineError::InvariantViolation(format!(
                "cannot rename {} to {}: nickname already tracked",
                old, new
            )));
        }
        let mut user = self
            .users
            .remove(&old_key)
            .ok_or_else(|| EngineError::UnknownUser(old.to_owned()))?;
        user.nickname = new.to_owned();
        user.key = new_key.clone();
        user.id = self.store.get_or_create_user_id(self.server, &new_key);

        for channel_key in &user.channels {
            if let Some(channel) = self.channels.get_mut(channel_key) {
                if let Some(modes) = channel.members.remove(&old_key) {
                    channel.members.insert(new_key.clone(), modes);
                }
            }
        }
        if self.new_users.remove(&old_key) {
            self.new_users.insert(new_key.clone());
        }
        self.users.insert(new_key, user);
        Ok(())
    }

    /// Drop users created this cycle that hold no channel membership.
    ///
    /// Returns the removed nicknames.
    pub fn prune_transient_users(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        for key in std::mem::take(&mut self.new_users) {
            let transient = self
                .users
                .get(&key)
                .is_some_and(|user| user.channels.is_empty());
            if transient {
                if let Some(user) = self.users.remove(&key) {
                    removed.push(user.nickname);
                }
            }
        }
        removed
    }

    /// Drain queued [`RegistryEvent`]s.
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Forget everything; used when the connection is re-established.
    pub fn clear(&mut self) {
        self.users.clear();
        self.channels.clear();
        self.new_users.clear();
        self.events.clear();
        self.case_mapping = CaseMapping::default();
        self.channel_types = DEFAULT_CHANNEL_TYPES.chars().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(1, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_rfc1459_folding() {
        let mut reg = registry();
        let id = reg.get_user("Foo", true).unwrap().id();
        assert_eq!(reg.get_user("foo", false).unwrap().id(), id);

        reg.get_user("Bar[]", true);
        assert!(reg.has_user("bar{}"));
        assert_eq!(reg.user_count(), 2);
    }

    #[test]
    fn test_new_user_event_once() {
        let mut reg = registry();
        reg.get_user("alice", true);
        reg.get_user("ALICE", true);
        reg.get_channel("#rust").unwrap();
        let events = reg.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RegistryEvent::NewUser { nickname, .. } if nickname == "alice"));
        assert!(reg.take_events().is_empty());
    }

    #[test]
    fn test_get_user_without_create() {
        let mut reg = registry();
        assert!(reg.get_user("ghost", false).is_none());
        assert_eq!(reg.user_count(), 0);
    }

    #[test]
    fn test_channel_name_validation() {
        let mut reg = registry();
        assert!(matches!(
            reg.get_channel("rust"),
            Err(EngineError::InvalidChannelName(_))
        ));
        reg.set_channel_types("#&");
        assert!(reg.get_channel("&local").is_ok());
        assert!(reg.has_channel("&LOCAL"));
        assert!(!reg.has_channel("local"));
    }

    #[test]
    fn test_transient_pruning() {
        let mut reg = registry();
        reg.get_user("lurker", true);
        reg.join("member", "#rust", "").unwrap();

        let removed = reg.prune_transient_users();
        assert_eq!(removed, vec!["lurker".to_string()]);
        assert!(!reg.has_user("lurker"));
        assert!(reg.has_user("member"));

        // Only users created in the cycle are candidates.
        reg.part("member", "#rust");
        assert!(reg.prune_transient_users().is_empty());
        assert!(reg.has_user("member"));
    }

    #[test]
    fn test_remove_channel_parts_members() {
        let mut reg = registry();
        reg.join("alice", "#rust", "o").unwrap();
        reg.join("alice", "#tokio", "").unwrap();
        reg.join("bob", "#rust", "").unwrap();

        let channel = reg.remove_channel("#RUST").unwrap();
        assert_eq!(channel.member_count(), 2);
        assert_eq!(reg.user("alice").unwrap().channel_count(), 1);
        assert_eq!(reg.user("bob").unwrap().channel_count(), 0);
    }

    #[test]
    fn test_remove_user_leaves_channels() {
        let mut reg = registry();
        reg.join("alice", "#rust", "").unwrap();
        reg.remove_user("Alice").unwrap();
        assert_eq!(reg.channel("#rust").unwrap().member_count(), 0);
    }

    #[test]
    fn test_change_nickname_rekeys() {
        let mut reg = registry();
        reg.join("alice", "#rust", "v").unwrap();
        let old_id = reg.user("alice").unwrap().id();

        reg.change_user_nickname("ALICE", "alice_").unwrap();
        assert!(!reg.has_user("alice"));
        let user = reg.user("alice_").unwrap();
        assert_eq!(user.nickname(), "alice_");
        assert_ne!(user.id(), old_id);

        let channel = reg.channel("#rust").unwrap();
        assert_eq!(channel.member_modes("alice_"), Some("v"));
        assert!(!channel.has_member_key("alice"));

        assert!(matches!(
            reg.change_user_nickname("nobody", "x"),
            Err(EngineError::UnknownUser(_))
        ));
    }

    #[test]
    fn test_rename_channel() {
        let mut reg = registry();
        reg.join("alice", "#old", "").unwrap();
        reg.rename_channel("#OLD", "#New").unwrap();

        assert!(reg.channel("#old").is_none());
        assert_eq!(reg.channel("#new").unwrap().name(), "#New");
        assert_eq!(reg.user("alice").unwrap().channels().collect::<Vec<_>>(), vec!["#new"]);
        assert!(reg.rename_channel("#gone", "#x").is_err());
    }

    #[test]
    fn test_rename_onto_tracked_entity_rejected() {
        let mut reg = registry();
        reg.join("alice", "#rust", "o").unwrap();
        reg.join("bob", "#rust", "").unwrap();
        reg.join("bob", "#go", "").unwrap();
        let bob_id = reg.user("bob").unwrap().id();

        assert!(matches!(
            reg.change_user_nickname("alice", "BOB"),
            Err(EngineError::InvariantViolation(_))
        ));
        assert_eq!(reg.user("bob").unwrap().id(), bob_id);
        assert_eq!(reg.user("bob").unwrap().channel_count(), 2);
        assert!(reg.has_user("alice"));
        let channel = reg.channel("#rust").unwrap();
        assert_eq!(channel.member_modes("alice"), Some("o"));
        assert_eq!(channel.member_count(), 2);

        assert!(matches!(
            reg.rename_channel("#rust", "#GO"),
            Err(EngineError::InvariantViolation(_))
        ));
        assert_eq!(reg.channel("#go").unwrap().member_count(), 1);
        assert_eq!(reg.channel("#rust").unwrap().member_count(), 2);

        // A case-only change keeps its own key.
        reg.change_user_nickname("alice", "Alice").unwrap();
        assert_eq!(reg.user("alice").unwrap().nickname(), "Alice");
        reg.rename_channel("#rust", "#Rust").unwrap();
        assert_eq!(reg.channel("#rust").unwrap().name(), "#Rust");
    }

    #[test]
    fn test_set_case_mapping_refolds() {
        let mut reg = registry();
        reg.join("Nick[a]", "#Chan[1]", "").unwrap();
        assert!(reg.has_user("nick{a}"));

        reg.set_case_mapping(CaseMapping::Ascii);
        assert!(!reg.has_user("nick{a}"));
        assert!(reg.has_user("NICK[A]"));
        let channel = reg.channel("#chan[1]").unwrap();
        assert!(channel.has_member_key("nick[a]"));
        assert_eq!(
            reg.user("nick[a]").unwrap().channels().collect::<Vec<_>>(),
            vec!["#chan[1]"]
        );
    }

    #[test]
    fn test_identity_stable_across_case() {
        let store = Arc::new(MemoryStore::new());
        let mut reg = EntityRegistry::new(1, store.clone());
        let id = reg.get_user("Alice", true).unwrap().id();
        reg.remove_user("alice");
        assert_eq!(reg.get_user("ALICE", true).unwrap().id(), id);
    }
}
