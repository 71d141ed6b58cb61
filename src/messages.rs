//! Message preparer: merges system prompt, history, and a new prompt into
//! the message list sent to the completion endpoint (C11).

use crate::error::{GateError, GateErrorKind, GateResult};
use crate::history::HistoryEntry;
use crate::llm::{Message, Role};

pub struct PrepareMessagesInput<'a> {
    pub custom_messages: Option<Vec<Message>>,
    pub system_prompt: Option<&'a str>,
    pub prompt: Option<&'a str>,
    pub history: Vec<HistoryEntry>,
}

/// Builds the message list per spec.md §4.10's precedence rules.
pub fn prepare_messages(input: PrepareMessagesInput) -> GateResult<Vec<Message>> {
    if let Some(custom) = input.custom_messages {
        return Ok(prepend_system_if_absent(custom, input.system_prompt));
    }

    if input.prompt.is_none() && input.system_prompt.is_none() && input.history.is_empty() {
        return Err(GateError::new(
            GateErrorKind::ConfigError,
            "at least one of prompt, system prompt, or history must be supplied",
        ));
    }

    let mut messages = Vec::new();
    if let Some(system_prompt) = input.system_prompt {
        messages.push(Message::system(system_prompt));
    }
    messages.extend(input.history.into_iter().map(|entry| filter_message(entry.message)));
    if let Some(prompt) = input.prompt {
        messages.push(Message::user(prompt));
    }
    Ok(messages)
}

fn prepend_system_if_absent(mut messages: Vec<Message>, system_prompt: Option<&str>) -> Vec<Message> {
    let Some(system_prompt) = system_prompt else {
        return messages;
    };
    if messages.iter().any(|m| m.role == Role::System) {
        crate::log("message preparer: custom messages already contain a system prompt, ignoring configured one");
        return messages;
    }
    messages.insert(0, Message::system(system_prompt));
    messages
}

/// Keeps role/content/name/tool_calls/tool_call_id; explicit `None` content
/// is preserved rather than becoming an empty string.
fn filter_message(message: Message) -> Message {
    Message {
        role: message.role,
        content: message.content,
        name: message.name,
        tool_call_id: message.tool_call_id,
        tool_calls: message.tool_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_at_least_one_input() {
        let result = prepare_messages(PrepareMessagesInput {
            custom_messages: None,
            system_prompt: None,
            prompt: None,
            history: Vec::new(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn assembles_system_history_prompt_in_order() {
        let history = vec![HistoryEntry::new(Message::user("earlier"))];
        let messages = prepare_messages(PrepareMessagesInput {
            custom_messages: None,
            system_prompt: Some("be helpful"),
            prompt: Some("now"),
            history,
        })
        .unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content.as_deref(), Some("earlier"));
        assert_eq!(messages[2].content.as_deref(), Some("now"));
    }

    #[test]
    fn custom_messages_used_verbatim_with_system_prepended() {
        let custom = vec![Message::user("hi")];
        let messages = prepare_messages(PrepareMessagesInput {
            custom_messages: Some(custom),
            system_prompt: Some("sys"),
            prompt: None,
            history: Vec::new(),
        })
        .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn custom_messages_with_existing_system_prompt_not_duplicated() {
        let custom = vec![Message::system("existing"), Message::user("hi")];
        let messages = prepare_messages(PrepareMessagesInput {
            custom_messages: Some(custom),
            system_prompt: Some("new one"),
            prompt: None,
            history: Vec::new(),
        })
        .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some("existing"));
    }

    #[test]
    fn idempotent_across_repeated_calls() {
        let history = vec![HistoryEntry::new(Message::user("earlier"))];
        let build = || {
            prepare_messages(PrepareMessagesInput {
                custom_messages: None,
                system_prompt: Some("sys"),
                prompt: Some("now"),
                history: history.clone(),
            })
            .unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].content, second[0].content);
    }
}
