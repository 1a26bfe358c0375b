//! Text helpers for transcription comparison and TTS input cleanup.

/// Collapse whitespace runs to single spaces, lowercase, and trim.
///
/// Used to compare consecutive unstable transcriptions so that a repeated
/// partial result does not trigger a redundant speculative `start`.
pub fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                normalized.push(' ');
                in_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                normalized.push(lower);
            }
            in_space = false;
        }
    }
    normalized.trim().to_string()
}

fn is_emoji(ch: char) -> bool {
    let cp = ch as u32;
    (0x1F600..=0x1F64F).contains(&cp)
        || (0x1F300..=0x1F5FF).contains(&cp)
        || (0x1F680..=0x1F6FF).contains(&cp)
        || (0x1F700..=0x1F77F).contains(&cp)
        || (0x1F780..=0x1F7FF).contains(&cp)
        || (0x1F800..=0x1F8FF).contains(&cp)
        || (0x1F900..=0x1F9FF).contains(&cp)
        || (0x1FA00..=0x1FA6F).contains(&cp)
        || (0x1FA70..=0x1FAFF).contains(&cp)
        || (0x2702..=0x27B0).contains(&cp)
        || (0x24C2..=0x1F251).contains(&cp)
}

/// Strip emoji codepoints before text is handed to speech synthesis.
pub fn remove_emojis(text: &str) -> String {
    text.chars().filter(|ch| !is_emoji(*ch)).collect()
}
