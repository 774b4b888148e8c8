//! Conversion between canonical and backend wire formats
//!
//! Conversation repair lives here so every adapter satisfies the same
//! alternation rules before translating.

pub mod openai;
pub mod vertex;

use crate::types::{Content, Message, Role};

/// Filler for injected placeholder user turns
///
/// A single non-empty token: backends that require user-first conversations
/// also reject an empty leading text block.
pub const PLACEHOLDER_USER_TEXT: &str = ".";

/// Repair a conversation so any backend accepts its shape
///
/// Tool turns count as user-side for alternation since every backend
/// carries tool results on the user side of the wire.
///
/// - If the first non-system turn is not user-side, a placeholder user
///   turn is inserted before it.
/// - Consecutive same-role user/assistant turns are merged.
/// - A trailing assistant turn gets a placeholder user turn appended when
///   the backend cannot continue assistant-authored text (no prefill).
#[must_use]
pub fn repair_conversation(messages: &[Message], supports_prefill: bool) -> Vec<Message> {
    let mut repaired: Vec<Message> = Vec::with_capacity(messages.len() + 1);

    for msg in messages {
        if msg.role == Role::System {
            repaired.push(msg.clone());
            continue;
        }

        let first_conversational = !repaired.iter().any(|m| m.role != Role::System);
        if first_conversational && !is_user_side(msg.role) {
            repaired.push(placeholder_user());
        }

        match repaired.last_mut() {
            Some(last) if last.role == msg.role && msg.role != Role::Tool => {
                merge_into(last, msg);
            }
            _ => repaired.push(msg.clone()),
        }
    }

    if !supports_prefill && repaired.last().is_some_and(|m| m.role == Role::Assistant) {
        repaired.push(placeholder_user());
    }

    repaired
}

/// Placeholder user turn injected during repair
#[must_use]
pub fn placeholder_user() -> Message {
    Message::user(PLACEHOLDER_USER_TEXT.to_owned())
}

const fn is_user_side(role: Role) -> bool {
    matches!(role, Role::User | Role::Tool)
}

/// Fold `next` into `last`, concatenating content, tool calls, and
/// attachments
fn merge_into(last: &mut Message, next: &Message) {
    let merged = match (std::mem::replace(&mut last.content, Content::Text(String::new())), &next.content) {
        (Content::Text(a), Content::Text(b)) => {
            if a.is_empty() {
                Content::Text(b.clone())
            } else if b.is_empty() {
                Content::Text(a)
            } else {
                Content::Text(format!("{a}\n{b}"))
            }
        }
        (a, b) => {
            let mut parts = a.into_parts();
            parts.extend(b.clone().into_parts());
            Content::Parts(parts)
        }
    };
    last.content = merged;

    if let Some(calls) = &next.tool_calls {
        last.tool_calls.get_or_insert_with(Vec::new).extend(calls.iter().cloned());
    }
    if let Some(attachments) = &next.attachments {
        last.attachments
            .get_or_insert_with(Vec::new)
            .extend(attachments.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_assistant_gets_placeholder_user() {
        let messages = vec![
            Message {
                role: Role::System,
                content: Content::Text("be helpful".to_owned()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
                attachments: None,
            },
            Message::assistant("hello".to_owned()),
        ];

        let repaired = repair_conversation(&messages, true);
        assert_eq!(repaired[0].role, Role::System);
        assert_eq!(repaired[1].role, Role::User);
        assert_eq!(repaired[1].content.as_text(), PLACEHOLDER_USER_TEXT);
        assert_eq!(repaired[2].role, Role::Assistant);
    }

    #[test]
    fn user_first_conversations_are_untouched() {
        let messages = vec![Message::user("hi".to_owned()), Message::assistant("hello".to_owned())];
        let repaired = repair_conversation(&messages, true);
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired[0].content.as_text(), "hi");
    }

    #[test]
    fn consecutive_same_role_turns_merge() {
        let messages = vec![
            Message::user("first".to_owned()),
            Message::user("second".to_owned()),
            Message::assistant("reply".to_owned()),
        ];

        let repaired = repair_conversation(&messages, true);
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired[0].content.as_text(), "first\nsecond");
    }

    #[test]
    fn trailing_assistant_without_prefill_gets_placeholder() {
        let messages = vec![Message::user("hi".to_owned()), Message::assistant("hello".to_owned())];

        let repaired = repair_conversation(&messages, false);
        assert_eq!(repaired.len(), 3);
        assert_eq!(repaired[2].role, Role::User);
        assert_eq!(repaired[2].content.as_text(), PLACEHOLDER_USER_TEXT);

        let kept = repair_conversation(&messages, true);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn tool_turns_count_as_user_side() {
        let messages = vec![
            Message::user("hi".to_owned()),
            Message::assistant("calling".to_owned()),
            Message::tool_result("call_1".to_owned(), "42".to_owned()),
            Message::tool_result("call_2".to_owned(), "43".to_owned()),
        ];

        let repaired = repair_conversation(&messages, true);
        // Tool turns are never merged with each other; adapters co-locate them
        assert_eq!(repaired.len(), 4);
    }
}
