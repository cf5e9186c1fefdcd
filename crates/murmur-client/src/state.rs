//! Local view of the chat, merged from REST responses and push events.
//!
//! Everything here is synchronous and free of I/O. The session decides when
//! to fetch; this module only decides what a response or an event does to
//! the local picture.

use std::collections::{HashMap, HashSet};

use murmur_shared::{Message, MessageId, Profile, PushEvent, UserId};

/// Profiles in display order, addressable by identity.
///
/// `upsert` is the only way in: an existing entry is replaced where it
/// stands, a new one goes to the end.
#[derive(Debug, Clone, Default)]
pub struct PeerList {
    order: Vec<Profile>,
    index: HashMap<UserId, usize>,
}

impl PeerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the profile was not present before.
    pub fn upsert(&mut self, profile: Profile) -> bool {
        match self.index.get(&profile.id) {
            Some(&pos) => {
                self.order[pos] = profile;
                false
            }
            None => {
                self.index.insert(profile.id.clone(), self.order.len());
                self.order.push(profile);
                true
            }
        }
    }

    /// Replace the whole list, keeping the given order. Later duplicates
    /// overwrite earlier ones in place.
    pub fn replace_all(&mut self, profiles: Vec<Profile>) {
        self.clear();
        for profile in profiles {
            self.upsert(profile);
        }
    }

    pub fn get(&self, id: &UserId) -> Option<&Profile> {
        self.index.get(id).map(|&pos| &self.order[pos])
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }
}

/// What the caller has to do after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    None,
    /// A message landed in the open conversation and should be marked seen
    /// on the server.
    MarkSeen(MessageId),
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    me: Option<Profile>,
    peers: PeerList,
    unseen: HashMap<UserId, u32>,
    online: HashSet<UserId>,
    selected: Option<UserId>,
    messages: Vec<Message>,
    users_loaded: bool,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn me(&self) -> Option<&Profile> {
        self.me.as_ref()
    }

    pub fn set_me(&mut self, profile: Profile) {
        self.me = Some(profile);
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    pub fn unseen(&self) -> &HashMap<UserId, u32> {
        &self.unseen
    }

    pub fn unseen_from(&self, peer: &UserId) -> u32 {
        self.unseen.get(peer).copied().unwrap_or(0)
    }

    pub fn online(&self) -> &HashSet<UserId> {
        &self.online
    }

    pub fn is_online(&self, id: &UserId) -> bool {
        self.online.contains(id)
    }

    pub fn selected(&self) -> Option<&UserId> {
        self.selected.as_ref()
    }

    /// Profile of the open conversation's peer, as currently known.
    pub fn selected_peer(&self) -> Option<&Profile> {
        self.selected.as_ref().and_then(|id| self.peers.get(id))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn users_loaded(&self) -> bool {
        self.users_loaded
    }

    /// Authoritative sidebar data from the server. Replaces peers and unseen
    /// counts wholesale. The open conversation never shows a badge.
    pub fn load_users(&mut self, users: Vec<Profile>, unseen: HashMap<UserId, u32>) {
        self.peers.replace_all(users);
        self.unseen = unseen;
        self.unseen.retain(|_, n| *n > 0);
        if let Some(ref peer) = self.selected {
            self.unseen.remove(peer);
        }
        self.users_loaded = true;
    }

    /// Open a conversation. Its badge clears at once; the history fetch that
    /// follows does the authoritative marking.
    pub fn select(&mut self, peer: UserId) {
        self.unseen.remove(&peer);
        if self.selected.as_ref() != Some(&peer) {
            self.messages.clear();
        }
        self.selected = Some(peer);
    }

    pub fn deselect(&mut self) {
        self.selected = None;
        self.messages.clear();
    }

    /// Install a fetched history. Ignored if the user moved on to another
    /// conversation while the fetch was in flight.
    pub fn set_history(&mut self, peer: &UserId, messages: Vec<Message>) -> bool {
        if self.selected.as_ref() != Some(peer) {
            return false;
        }
        self.messages = messages;
        true
    }

    /// Append a message this client just sent, if its conversation is open.
    pub fn push_sent(&mut self, message: Message) {
        if self.selected.as_ref() == Some(&message.receiver_id)
            && !self.messages.iter().any(|m| m.id == message.id)
        {
            self.messages.push(message);
        }
    }

    pub fn mark_local_seen(&mut self, id: MessageId) {
        if let Some(m) = self.messages.iter_mut().find(|m| m.id == id) {
            m.seen = true;
        }
    }

    pub fn apply(&mut self, event: PushEvent) -> FollowUp {
        match event {
            PushEvent::PresenceSet(ids) => {
                self.online = ids.into_iter().collect();
                FollowUp::None
            }
            PushEvent::MessageCreated(message) => self.receive(message),
            PushEvent::PeerCreated(profile) => {
                if !self.is_me(&profile.id) {
                    self.peers.upsert(profile);
                }
                FollowUp::None
            }
            PushEvent::PeerUpdated(profile) => {
                if self.is_me(&profile.id) {
                    self.me = Some(profile);
                } else {
                    self.peers.upsert(profile);
                }
                FollowUp::None
            }
        }
    }

    fn receive(&mut self, mut message: Message) -> FollowUp {
        if let Some(ref me) = self.me {
            if message.receiver_id != me.id {
                return FollowUp::None;
            }
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return FollowUp::None;
        }

        if self.selected.as_ref() == Some(&message.sender_id) {
            message.seen = true;
            let id = message.id;
            self.messages.push(message);
            FollowUp::MarkSeen(id)
        } else {
            *self.unseen.entry(message.sender_id).or_insert(0) += 1;
            FollowUp::None
        }
    }

    fn is_me(&self, id: &UserId) -> bool {
        self.me.as_ref().is_some_and(|me| &me.id == id)
    }

    /// Forget everything. Used on sign-out.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
