//! Bounded conversation history with a pinned system message.
//!
//! Eviction policy: at most `max_messages` non-system messages are kept
//! (default 10). When a push exceeds the cap, the oldest non-system
//! messages are removed first, one at a time, until the cap holds. The
//! system message is never evicted or reordered.

use crate::{Message, Role};

pub const DEFAULT_MAX_MESSAGES: usize = 10;

/// Ordered, role-tagged message store. Pure state; cannot fail.
#[derive(Debug, Default)]
pub struct ChatHistory {
    system: Option<Message>,
    messages: Vec<Message>,
    max_messages: usize,
}

impl ChatHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            max_messages,
        }
    }

    /// Insert or replace the single pinned system message.
    pub fn set_system_message(&mut self, content: impl Into<String>) {
        self.system = Some(Message::system(content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    pub fn push_tool_call(&mut self, name: impl Into<String>, arguments: impl Into<String>) {
        self.push(Message::tool_call(name, arguments));
    }

    pub fn push_tool_result(&mut self, name: impl Into<String>, result: impl Into<String>) {
        self.push(Message::tool_result(name, result));
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.evict();
    }

    fn evict(&mut self) {
        while self.messages.len() > self.max_messages {
            self.messages.remove(0);
        }
    }

    /// The full message sequence, system message first when present.
    pub fn messages(&self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref system) = self.system {
            all.push(system.clone());
        }
        all.extend(self.messages.iter().cloned());
        all
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.system.as_ref()
    }

    /// Number of non-system messages.
    pub fn non_system_len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.system.is_none()
    }

    /// Reset history, optionally retaining the system message.
    pub fn clear(&mut self, keep_system: bool) {
        self.messages.clear();
        if !keep_system {
            self.system = None;
        }
    }
}
