//! History Windowing
//!
//! Bounds the conversation that is sent back to the serving endpoint on
//! every turn. The window keeps the earliest system message, then the most
//! recent turns, then drops further turns from the oldest end until the
//! serialized size fits the character budget.
//!
//! Message content is never truncated. A window that cannot fit with a
//! single turn fails with [`HistoryError::BudgetUnsatisfiable`].
//!
//! # Size accounting
//!
//! The size of a window is the character count of its serialized message
//! array: the [`Message::wire_chars`] of every message plus the enclosing
//! brackets and the separating commas.

use std::collections::VecDeque;

use serde_json::Value;
use thiserror::Error;

use crate::messages::{Message, Role};

/// Errors produced while windowing history
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Even the pinned system message plus the latest turn exceed the budget
    #[error("history needs {required} characters but the budget is {budget}")]
    BudgetUnsatisfiable {
        /// Size of the smallest admissible window
        required: usize,
        /// Configured character budget
        budget: usize,
    },
}

/// Window limits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Maximum number of turns to keep
    pub max_turns: usize,
    /// Maximum serialized size in characters
    pub max_chars: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_chars: 100_000,
        }
    }
}

/// One user message and everything produced in response to it
#[derive(Clone, Debug, PartialEq, Eq)]
struct Turn {
    messages: Vec<Message>,
    chars: usize,
}

impl Turn {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            chars: 0,
        }
    }

    fn push(&mut self, message: Message) {
        self.chars += message.wire_chars();
        self.messages.push(message);
    }
}

/// Bounded view of a transcript, ready to be sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedHistory {
    messages: Vec<Message>,
    turn_count: usize,
    total_chars: usize,
    has_system: bool,
}

impl BoundedHistory {
    /// Messages in send order (system first, if any)
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The pinned system message, if the transcript had one
    #[must_use]
    pub fn system(&self) -> Option<&Message> {
        if self.has_system {
            self.messages.first()
        } else {
            None
        }
    }

    /// Number of turns kept
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    /// Serialized size in characters
    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Whether nothing is left to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Wire objects for the request payload
    #[must_use]
    pub fn to_wire(&self) -> Vec<Value> {
        self.messages.iter().map(Message::to_wire).collect()
    }
}

/// Builds [`BoundedHistory`] values under fixed limits
#[derive(Clone, Copy, Debug, Default)]
pub struct HistoryWindower {
    limits: HistoryLimits,
}

impl HistoryWindower {
    /// Create a windower
    #[must_use]
    pub fn new(limits: HistoryLimits) -> Self {
        Self { limits }
    }

    /// Window a transcript
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::BudgetUnsatisfiable`] when the system message
    /// plus the single most recent turn do not fit the character budget.
    pub fn build(&self, transcript: &[Message]) -> Result<BoundedHistory, HistoryError> {
        build(transcript, self.limits.max_turns, self.limits.max_chars)
    }
}

/// Window a transcript to at most `max_turns` turns and `max_chars` characters
///
/// Deterministic: the same transcript and limits always give the same result.
///
/// # Errors
///
/// Returns [`HistoryError::BudgetUnsatisfiable`] when the system message
/// plus the single most recent turn do not fit the character budget.
pub fn build(
    transcript: &[Message],
    max_turns: usize,
    max_chars: usize,
) -> Result<BoundedHistory, HistoryError> {
    let mut ordered: Vec<&Message> = transcript.iter().collect();
    ordered.sort_by_key(|m| m.ordinal);

    let system_index = ordered.iter().position(|m| m.role == Role::System);
    let system = system_index.map(|i| ordered[i].clone());
    let system_chars = system.as_ref().map_or(0, Message::wire_chars);

    let remaining = ordered
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != system_index)
        .map(|(_, m)| (*m).clone());
    let turns = group_turns(remaining);

    let skip = turns.len().saturating_sub(max_turns);
    let mut selected: VecDeque<Turn> = turns.into_iter().skip(skip).collect();
    let mut content = system_chars + selected.iter().map(|t| t.chars).sum::<usize>();
    let mut count =
        usize::from(system.is_some()) + selected.iter().map(|t| t.messages.len()).sum::<usize>();

    while array_chars(content, count) > max_chars && selected.len() > 1 {
        if let Some(dropped) = selected.pop_front() {
            content -= dropped.chars;
            count -= dropped.messages.len();
            tracing::debug!(
                dropped_chars = dropped.chars,
                remaining_turns = selected.len(),
                "Dropped oldest turn to fit character budget"
            );
        }
    }

    let total = array_chars(content, count);
    if total > max_chars {
        return Err(HistoryError::BudgetUnsatisfiable {
            required: total,
            budget: max_chars,
        });
    }

    let turn_count = selected.len();
    let mut messages = Vec::with_capacity(1 + selected.iter().map(|t| t.messages.len()).sum::<usize>());
    let has_system = system.is_some();
    messages.extend(system);
    for turn in selected {
        messages.extend(turn.messages);
    }

    Ok(BoundedHistory {
        messages,
        turn_count,
        total_chars: total,
        has_system,
    })
}

/// Serialized length of a JSON array holding `count` objects of `content` chars
fn array_chars(content: usize, count: usize) -> usize {
    content + 2 + count.saturating_sub(1)
}

/// Split messages into turns at each user message
///
/// Messages that precede the first user message form a turn of their own.
fn group_turns(messages: impl Iterator<Item = Message>) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut current = Turn::new();

    for message in messages {
        if message.role == Role::User && !current.messages.is_empty() {
            turns.push(std::mem::replace(&mut current, Turn::new()));
        }
        current.push(message);
    }

    if !current.messages.is_empty() {
        turns.push(current);
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transcript_with_turns(turns: u64) -> Vec<Message> {
        let mut messages = vec![Message::system("You are a careful analyst.", 0)];
        let mut ordinal = 1;
        for turn in 0..turns {
            messages.push(Message::user(format!("question {turn}"), ordinal));
            messages.push(Message::assistant(format!("answer {turn}"), ordinal + 1));
            ordinal += 2;
        }
        messages
    }

    fn serialized_chars(messages: &[&Message]) -> usize {
        let wire: Vec<Value> = messages.iter().map(|m| m.to_wire()).collect();
        serde_json::to_string(&wire).unwrap().chars().count()
    }

    #[test]
    fn test_keeps_system_and_last_turns() {
        let transcript = transcript_with_turns(5);
        let history = build(&transcript, 2, 10_000).unwrap();

        assert_eq!(history.turn_count(), 2);
        let contents: Vec<&str> = history.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "You are a careful analyst.",
                "question 3",
                "answer 3",
                "question 4",
                "answer 4",
            ]
        );
        assert_eq!(history.system().map(|m| m.ordinal), Some(0));
    }

    #[test]
    fn test_budget_below_system_plus_one_turn_fails() {
        let transcript = transcript_with_turns(5);
        let smallest = serialized_chars(&[&transcript[0], &transcript[9], &transcript[10]]);

        let result = build(&transcript, 2, smallest - 1);
        assert_eq!(
            result,
            Err(HistoryError::BudgetUnsatisfiable {
                required: smallest,
                budget: smallest - 1,
            })
        );
    }

    #[test]
    fn test_budget_drops_oldest_turns_first() {
        let transcript = transcript_with_turns(5);
        let budget = serialized_chars(&[&transcript[0], &transcript[9], &transcript[10]]) + 1;

        let history = build(&transcript, 5, budget).unwrap();
        assert_eq!(history.turn_count(), 1);
        assert_eq!(history.messages()[1].content, "question 4");
        assert!(history.total_chars() <= budget);
    }

    #[test]
    fn test_total_chars_matches_serialized_payload() {
        let transcript = transcript_with_turns(6);
        for (turns, chars) in [(1, 10_000), (3, 10_000), (6, 400), (6, 250)] {
            let history = build(&transcript, turns, chars).unwrap();
            let payload = serde_json::to_string(&history.to_wire()).unwrap();
            assert_eq!(history.total_chars(), payload.chars().count());
            assert!(payload.chars().count() <= chars);
        }
    }

    #[test]
    fn test_separators_count_against_budget() {
        let transcript = transcript_with_turns(2);
        let content: usize = transcript.iter().map(Message::wire_chars).sum();

        let result = build(&transcript, 2, content);
        let history = result.unwrap();
        assert_eq!(history.turn_count(), 1);
        assert_eq!(history.messages()[1].content, "question 1");
    }

    #[test]
    fn test_build_is_idempotent() {
        let transcript = transcript_with_turns(7);
        for (turns, chars) in [(1, 10_000), (3, 400), (10, 250), (0, 100)] {
            let first = build(&transcript, turns, chars);
            let second = build(&transcript, turns, chars);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_system_message_survives_every_limit() {
        let transcript = transcript_with_turns(4);
        for turns in 0..6 {
            for chars in [150, 300, 1_000, 10_000] {
                if let Ok(history) = build(&transcript, turns, chars) {
                    assert_eq!(history.messages()[0].role, Role::System);
                    assert!(history.total_chars() <= chars);
                }
            }
        }
    }

    #[test]
    fn test_only_earliest_system_message_is_pinned() {
        let transcript = vec![
            Message::user("first", 1),
            Message::system("late system note", 4),
            Message::system("primary", 0),
            Message::assistant("reply", 2),
            Message::user("second", 3),
        ];
        let history = build(&transcript, 1, 10_000).unwrap();
        let contents: Vec<&str> = history.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["primary", "second", "late system note"]);
    }

    #[test]
    fn test_tool_messages_stay_with_their_turn() {
        let transcript = vec![
            Message::user("look it up", 0),
            Message::assistant("{\"tool_calls\":[]}", 1),
            Message::tool("call_1", "{\"rows\":3}", 2),
            Message::assistant("three rows", 3),
            Message::user("thanks", 4),
        ];
        let history = build(&transcript, 2, 10_000).unwrap();
        assert_eq!(history.turn_count(), 2);
        assert_eq!(history.messages().len(), 5);
        assert!(history.system().is_none());
    }

    #[test]
    fn test_empty_transcript_is_empty_history() {
        let history = build(&[], 3, 10).unwrap();
        assert!(history.is_empty());
        assert_eq!(history.total_chars(), "[]".len());
    }

    #[test]
    fn test_windower_uses_limits() {
        let windower = HistoryWindower::new(HistoryLimits {
            max_turns: 1,
            max_chars: 10_000,
        });
        let history = windower.build(&transcript_with_turns(3)).unwrap();
        assert_eq!(history.turn_count(), 1);
        assert_eq!(history.to_wire().len(), 3);
    }
}
