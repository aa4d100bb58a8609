//! # Conversation History
//!
//! Per-session, bounded record of the conversation. Each WebSocket session
//! owns its own history (created on connect, destroyed on disconnect), so
//! concurrent users never see each other's turns. The store is a ring: once
//! the cap is reached, the oldest entries fall off, keeping per-session
//! memory bounded no matter how long a client stays connected.
//!
//! Only a trailing window of entries is sent to the completion backend per
//! request; the full (bounded) history stays server-side.

use std::collections::VecDeque;

/// Number of trailing history entries included in each completion request.
pub const COMPLETION_WINDOW: usize = 10;

/// One role-tagged entry in a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    /// Something the user said (typed or transcribed)
    User { content: String },

    /// The assistant's final reply text for a turn
    Assistant { content: String },

    /// A tool invocation requested by the model
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },

    /// The result of a tool invocation, keyed by the originating call
    ToolResult { call_id: String, output: String },
}

/// Bounded, ordered conversation record for one session.
#[derive(Debug)]
pub struct ConversationHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl ConversationHistory {
    /// Create an empty history capped at `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    /// Append an entry, dropping the oldest if the ring is full.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(HistoryEntry::User {
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(HistoryEntry::Assistant {
            content: content.into(),
        });
    }

    /// The trailing `n` entries, oldest first. This is what a completion
    /// request carries.
    pub fn window(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_window_order() {
        let mut history = ConversationHistory::new(100);
        history.push_user("hello");
        history.push_assistant("hi there");
        history.push_user("how are you");

        let window = history.window(2);
        assert_eq!(window.len(), 2);
        assert_eq!(
            window[0],
            HistoryEntry::Assistant {
                content: "hi there".into()
            }
        );
        assert_eq!(
            window[1],
            HistoryEntry::User {
                content: "how are you".into()
            }
        );
    }

    #[test]
    fn test_window_larger_than_history() {
        let mut history = ConversationHistory::new(100);
        history.push_user("only entry");
        assert_eq!(history.window(10).len(), 1);
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut history = ConversationHistory::new(3);
        for i in 0..5 {
            history.push_user(format!("msg {}", i));
        }
        assert_eq!(history.len(), 3);
        let window = history.window(3);
        assert_eq!(
            window[0],
            HistoryEntry::User {
                content: "msg 2".into()
            }
        );
    }

    #[test]
    fn test_tool_entries_keep_call_id() {
        let mut history = ConversationHistory::new(10);
        history.push(HistoryEntry::ToolCall {
            call_id: "call_42".into(),
            name: "identify_user".into(),
            arguments: "{}".into(),
        });
        history.push(HistoryEntry::ToolResult {
            call_id: "call_42".into(),
            output: "It's Kyle".into(),
        });

        match &history.window(1)[0] {
            HistoryEntry::ToolResult { call_id, .. } => assert_eq!(call_id, "call_42"),
            other => panic!("unexpected entry: {:?}", other),
        }
    }
}
