//! On-screen chat transcript

use std::sync::{Mutex, MutexGuard};

use alter_core::ChatMessage;

/// Messages shown to the user, oldest first
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Mutex<Vec<ChatMessage>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace everything with replayed history
    pub fn replace(&self, messages: Vec<ChatMessage>) {
        *self.lock() = messages;
    }

    pub fn push(&self, message: ChatMessage) {
        self.lock().push(message);
    }

    /// Take back a message that never made it to the store
    pub fn retract(&self, message: &ChatMessage) -> bool {
        let mut messages = self.lock();
        match messages.iter().rposition(|m| m == message) {
            Some(index) => {
                messages.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.lock().clone()
    }

    /// The newest `limit` messages, oldest first
    pub fn window(&self, limit: usize) -> Vec<ChatMessage> {
        let messages = self.lock();
        let skip = messages.len().saturating_sub(limit);
        messages[skip..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
