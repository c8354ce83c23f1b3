use serde::{Deserialize, Serialize};

use crate::message::{HandoffRecord, Message};

/// Ordered, append-only conversation shared by every agent in one run.
///
/// There is no way to remove, reorder, or mutably borrow a message once it
/// has been pushed, so any earlier snapshot is always a prefix of a later one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Start a transcript from the user's query.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(query)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages appended after `mark` (a previous `len()`).
    pub fn since(&self, mark: usize) -> &[Message] {
        &self.messages[mark.min(self.messages.len())..]
    }

    /// Messages written by the named author.
    pub fn authored_by<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages
            .iter()
            .filter(move |m| m.name.as_deref() == Some(name))
    }

    pub fn handoffs(&self) -> impl Iterator<Item = &HandoffRecord> {
        self.messages.iter().filter_map(|m| m.handoff.as_ref())
    }

    /// True if `earlier` is a prefix of this transcript.
    pub fn extends(&self, earlier: &Transcript) -> bool {
        earlier.len() <= self.len() && self.messages[..earlier.len()] == earlier.messages[..]
    }
}

/// One streamed unit of progress, rendered by the console printer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptUpdate {
    /// Specialist whose inner loop produced this update, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub node: String,
    pub messages: Vec<Message>,
}

impl TranscriptUpdate {
    pub fn node(node: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            namespace: None,
            node: node.into(),
            messages,
        }
    }

    pub fn nested(namespace: impl Into<String>, node: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            node: node.into(),
            messages,
        }
    }

    pub fn is_nested(&self) -> bool {
        self.namespace.is_some()
    }
}
