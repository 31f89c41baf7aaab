//! Outgoing text formatting.
//!
//! Platforms cap the length of a single message (Discord: 2000 characters).
//! Longer replies are cut into consecutive fixed-size chunks; concatenating
//! the chunks in order yields the original text.

/// Maximum message length for Discord.
pub const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Chunk boundaries fall on `char` boundaries, never inside a UTF-8 sequence.
/// Text that already fits is returned as a single chunk.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
