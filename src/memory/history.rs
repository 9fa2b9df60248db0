use crate::types::ChatMessage;

/// In-memory conversation turns for one process session.
///
/// With a non-zero window only the last N turns are kept; a "turn" is a
/// user+assistant message pair (2 messages). Nothing here is persisted.
#[derive(Debug, Default)]
pub struct TurnHistory {
    /// Number of turns to keep. 0 keeps everything.
    window_turns: usize,
    messages: Vec<ChatMessage>,
}

impl TurnHistory {
    pub fn new(window_turns: usize) -> Self {
        Self {
            window_turns,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.window_turns > 0 {
            let max_messages = self.window_turns * 2;
            if self.messages.len() > max_messages {
                let drain_count = self.messages.len() - max_messages;
                self.messages.drain(..drain_count);
            }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn window_size(&self) -> usize {
        self.window_turns
    }
}
