use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::UnixTimeMs;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }
}

/// One chat entry. `content` is opaque and may carry markdown for bot replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,
    pub timestamp: UnixTimeMs,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageStoreError {
    #[error("duplicate message id: {0}")]
    DuplicateId(MessageId),
}

/// Append-only, insertion-ordered message log for one chat session.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    next_seq: u64,
    revision: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next id from the store's counter. Ids are never reused.
    pub fn next_id(&mut self) -> MessageId {
        loop {
            self.next_seq += 1;
            let id = MessageId(format!("msg-{}", self.next_seq));
            if !self.ids.contains(&id) {
                return id;
            }
        }
    }

    pub fn append(&mut self, message: Message) -> Result<(), MessageStoreError> {
        if !self.ids.insert(message.id.clone()) {
            return Err(MessageStoreError::DuplicateId(message.id));
        }
        self.messages.push(message);
        self.revision += 1;
        Ok(())
    }

    /// Builds a message with a fresh id and appends it.
    pub fn push(
        &mut self,
        sender: Sender,
        content: impl Into<String>,
        image_url: Option<String>,
        timestamp: UnixTimeMs,
    ) -> MessageId {
        let id = self.next_id();
        self.messages.push(Message {
            id: id.clone(),
            content: content.into(),
            sender,
            timestamp,
            image_url,
        });
        self.ids.insert(id.clone());
        self.revision += 1;
        id
    }

    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bumped on every append; the surface scrolls to the latest entry when it moves.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: MessageId::new(id),
            content: content.to_string(),
            sender: Sender::User,
            timestamp: UnixTimeMs(0),
            image_url: None,
        }
    }

    #[test]
    fn test_push_generates_sequential_ids() {
        let mut store = MessageStore::new();
        let a = store.push(Sender::Bot, "hello", None, UnixTimeMs(1));
        let b = store.push(Sender::User, "hi", None, UnixTimeMs(1));
        assert_eq!(a.as_str(), "msg-1");
        assert_eq!(b.as_str(), "msg-2");
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_append_rejects_duplicate() {
        let mut store = MessageStore::new();
        store.append(message("a", "first")).unwrap();
        let result = store.append(message("a", "second"));
        assert_eq!(
            result,
            Err(MessageStoreError::DuplicateId(MessageId::new("a")))
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].content, "first");
    }

    #[test]
    fn test_next_id_skips_externally_appended_ids() {
        let mut store = MessageStore::new();
        store.append(message("msg-1", "external")).unwrap();
        let id = store.push(Sender::Bot, "generated", None, UnixTimeMs(0));
        assert_eq!(id.as_str(), "msg-2");
    }

    #[test]
    fn test_get_and_last() {
        let mut store = MessageStore::new();
        assert!(store.last().is_none());
        let id = store.push(Sender::User, "look", Some("blob:1".into()), UnixTimeMs(0));
        store.push(Sender::Bot, "ok", None, UnixTimeMs(0));
        assert_eq!(store.get(&id).and_then(|m| m.image_url.as_deref()), Some("blob:1"));
        assert_eq!(store.last().map(|m| m.sender), Some(Sender::Bot));
    }

    proptest! {
        #[test]
        fn appends_preserve_order_and_unique_ids(
            entries in prop::collection::vec((any::<bool>(), "[a-z ]{0,12}"), 0..64)
        ) {
            let mut store = MessageStore::new();
            for (is_bot, content) in &entries {
                let sender = if *is_bot { Sender::Bot } else { Sender::User };
                store.push(sender, content.clone(), None, UnixTimeMs(0));
            }

            prop_assert_eq!(store.len(), entries.len());
            for (stored, (is_bot, content)) in store.all().iter().zip(&entries) {
                prop_assert_eq!(&stored.content, content);
                prop_assert_eq!(stored.sender == Sender::Bot, *is_bot);
            }

            let unique: HashSet<_> = store.all().iter().map(|m| m.id.clone()).collect();
            prop_assert_eq!(unique.len(), entries.len());
        }
    }
}
