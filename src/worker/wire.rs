//! Prompt composition, id generation, token counting, and system
//! fingerprint — the small pure helpers behind the envelope builder.

use llamapool_protocol::{ChatMessage, Role};

/// Flattens a chat message history into the prompt text the engine sees.
/// Only `system` and `user` turns contribute; each contributed line carries
/// its own trailing newline.
pub fn compose_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role {
            Role::System => {
                prompt.push_str("System: ");
                prompt.push_str(&message.content);
                prompt.push('\n');
            }
            Role::User => {
                prompt.push_str("User: ");
                prompt.push_str(&message.content);
                prompt.push('\n');
            }
            Role::Assistant => {}
        }
    }
    prompt
}

/// `/v1/chat/completions` id: `chatcmpl-<unix_seconds>`.
pub fn plain_completion_id(now_unix_s: i64) -> String {
    format!("chatcmpl-{now_unix_s}")
}

/// `/v1/beta/chat/completions/parse` id: `chatcmpl-<24 hex chars>` from a
/// fresh random UUID.
pub fn structured_completion_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..24])
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Plain endpoint token count: word count alone, no length term.
pub fn count_tokens_plain(text: &str) -> u32 {
    word_count(text)
}

/// Structured endpoint token count: `max(1, word_count + len/4)`.
pub fn count_tokens_structured(text: &str) -> u32 {
    (word_count(text) + (text.len() as u32) / 4).max(1)
}

/// `"fp_" + first 12 hex chars of MD5("<model>_<seed>_<epoch_hours>")`.
pub fn system_fingerprint(model: &str, seed: i64, now_unix_s: i64) -> String {
    let epoch_hours = now_unix_s / 3600;
    let content = format!("{model}_{seed}_{epoch_hours}");
    let digest = format!("{:x}", md5::compute(content.as_bytes()));
    format!("fp_{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_prompt_keeps_order_and_skips_assistant() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
            ChatMessage {
                role: Role::Assistant,
                content: "ignored".to_string(),
            },
        ];
        let prompt = compose_prompt(&messages);
        assert_eq!(prompt, "System: be terse\nUser: hi\n");
    }

    #[test]
    fn compose_prompt_of_empty_messages_is_empty_string() {
        assert_eq!(compose_prompt(&[]), "");
    }

    #[test]
    fn plain_token_count_is_word_count_only() {
        assert_eq!(count_tokens_plain("one two three"), 3);
        assert_eq!(count_tokens_plain(""), 0);
    }

    #[test]
    fn structured_token_count_has_length_term_and_floor_of_one() {
        assert_eq!(count_tokens_structured(""), 1);
        let text = "one two three"; // 3 words, 13 chars -> 3 + 13/4 = 6
        assert_eq!(count_tokens_structured(text), 6);
    }

    #[test]
    fn structured_id_is_24_hex_chars_after_prefix() {
        let id = structured_completion_id();
        let suffix = id.strip_prefix("chatcmpl-").unwrap();
        assert_eq!(suffix.len(), 24);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_changes_with_epoch_hour_not_second() {
        let a = system_fingerprint("m", 0, 3600);
        let b = system_fingerprint("m", 0, 3601);
        let c = system_fingerprint("m", 0, 7200);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("fp_"));
        assert_eq!(a.len(), "fp_".len() + 12);
    }
}
