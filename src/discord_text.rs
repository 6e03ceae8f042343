use serenity::all::{
    ChannelId, CommandInteraction, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateMessage, EditInteractionResponse, Http,
};

/// Longest chunk sent in a single message, leaving headroom under Discord's 2000.
pub const DISCORD_MAX_LEN: usize = 1900;

/// Split `input` into chunks of at most [`DISCORD_MAX_LEN`] characters.
///
/// Lines are kept whole where possible and each keeps its trailing newline;
/// a line that cannot fit with its newline is hard-split on its own.
pub fn chunk_message(input: &str) -> Vec<String> {
    chunk_message_with_limit(input, DISCORD_MAX_LEN)
}

fn chunk_message_with_limit(input: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0;

    for line in input.split('\n') {
        let line_len = line.chars().count();

        if line_len >= limit {
            if !buffer.is_empty() {
                chunks.push(std::mem::take(&mut buffer));
                buffer_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
        } else if buffer_len + line_len + 1 > limit {
            if !buffer.is_empty() {
                chunks.push(std::mem::take(&mut buffer));
            }
            buffer.push_str(line);
            buffer.push('\n');
            buffer_len = line_len + 1;
        } else {
            buffer.push_str(line);
            buffer.push('\n');
            buffer_len += line_len + 1;
        }
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }
    chunks
}

/// Case-insensitive equality; two missing strings are equal.
pub fn string_equivalence(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
        (a, b) => a.is_none() && b.is_none(),
    }
}

/// Case-insensitive substring search; two missing strings match.
pub fn string_search(haystack: Option<&str>, needle: Option<&str>) -> bool {
    match (haystack, needle) {
        (Some(haystack), Some(needle)) => haystack
            .to_lowercase()
            .contains(&needle.to_lowercase()),
        (a, b) => a.is_none() && b.is_none(),
    }
}

/// Post `content` to a channel as one message per chunk.
pub async fn send_chunked(
    http: &Http,
    channel_id: ChannelId,
    content: &str,
) -> Result<(), serenity::Error> {
    for chunk in chunk_message(content) {
        channel_id
            .send_message(http, CreateMessage::new().content(chunk))
            .await?;
    }
    Ok(())
}

/// Answer a command interaction: the first chunk becomes the reply (or edits
/// the deferred reply), the rest are sent as follow-ups.
pub async fn reply_chunked(
    http: &Http,
    interaction: &CommandInteraction,
    content: &str,
    deferred: bool,
) -> Result<(), serenity::Error> {
    let mut chunks = chunk_message(content).into_iter();
    let first = chunks.next().unwrap_or_default();

    if deferred {
        interaction
            .edit_response(http, EditInteractionResponse::new().content(first))
            .await?;
    } else {
        interaction
            .create_response(
                http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new().content(first),
                ),
            )
            .await?;
    }

    for chunk in chunks {
        interaction
            .create_followup(http, CreateInteractionResponseFollowup::new().content(chunk))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(chunk_message("hello\nworld"), vec!["hello\nworld\n".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let chunks = chunk_message_with_limit("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n".to_string(), "cccc\n".to_string()]);
    }

    #[test]
    fn oversized_line_is_hard_split() {
        let chunks = chunk_message_with_limit("ab\ncdefghij\nk", 4);
        assert_eq!(chunks, vec!["ab\n", "cdef", "ghij", "k\n"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn line_exactly_at_limit_produces_no_empty_chunk() {
        let chunks = chunk_message_with_limit("abcd\nef", 4);
        assert!(chunks.iter().all(|c| !c.is_empty()));
        assert_eq!(chunks.concat().replace('\n', ""), "abcdef");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let line = "é".repeat(DISCORD_MAX_LEN);
        let chunks = chunk_message(&line);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chars().count(), DISCORD_MAX_LEN);
    }

    #[test]
    fn every_real_chunk_fits() {
        let input = (0..500)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_message(&input);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= DISCORD_MAX_LEN));
    }

    #[test]
    fn string_helpers_ignore_case() {
        assert!(string_equivalence(Some("Ping"), Some("pING")));
        assert!(!string_equivalence(Some("ping"), Some("pong")));
        assert!(string_equivalence(None, None));
        assert!(!string_equivalence(Some("ping"), None));

        assert!(string_search(Some("Hello World"), Some("WORLD")));
        assert!(!string_search(Some("Hello"), Some("bye")));
        assert!(string_search(None, None));
        assert!(!string_search(None, Some("x")));
    }
}
