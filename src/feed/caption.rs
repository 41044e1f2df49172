// src/feed/caption.rs
//! Caption shaping: persona instruction for the text generator, local
//! clean-up of whatever comes back, length cap and final message layout.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Hard cap on the transformed caption, in characters.
pub const MAX_CAPTION_CHARS: usize = 500;

/// Persona instruction sent with every caption rewrite. The subject is always
/// named explicitly so the model never falls back to "ele"/"ela".
pub fn persona_instruction(subject_name: &str) -> String {
    format!(
        "Você reescreve legendas de posts do Instagram de {subject_name} para envio em grupos de WhatsApp. \
Escreva em português, em terceira pessoa, sempre citando {subject_name} pelo nome (nunca use apenas \"ele\" ou \"ela\"). \
Tom próximo e informativo, no máximo {MAX_CAPTION_CHARS} caracteres. \
Não use markdown, hashtags, menções com @, emojis nem links. Responda apenas com o texto final."
    )
}

/// Strip what the persona forbids: URLs, @mentions, #hashtags, markdown
/// markers and emoji. Whitespace is collapsed per line; blank lines dropped.
pub fn sanitize_caption(s: &str) -> String {
    static RE_URL: OnceCell<Regex> = OnceCell::new();
    static RE_MENTION: OnceCell<Regex> = OnceCell::new();
    static RE_HASHTAG: OnceCell<Regex> = OnceCell::new();
    static RE_MD: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    let re_url = RE_URL.get_or_init(|| {
        Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("static regex")
    });
    let re_mention = RE_MENTION.get_or_init(|| Regex::new(r"(^|\s)@[\w.]+").expect("static regex"));
    let re_hashtag =
        RE_HASHTAG.get_or_init(|| Regex::new(r"(^|\s)#[\p{L}\p{N}_]+").expect("static regex"));
    let re_md = RE_MD.get_or_init(|| Regex::new(r"[*_~`]|^\s*(?:#+|>)\s*").expect("static regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t\u{00A0}]+").expect("static regex"));

    let no_emoji: String = s.chars().filter(|c| !is_emoji(*c)).collect();
    let out = re_url.replace_all(&no_emoji, "");
    let out = re_mention.replace_all(&out, "$1");
    let out = re_hashtag.replace_all(&out, "$1");

    out.lines()
        .map(|line| {
            let line = re_md.replace_all(line, "");
            re_ws.replace_all(&line, " ").trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF // pictographs, emoticons, transport, flags
            | 0x2600..=0x27BF // misc symbols, dingbats
            | 0x2B00..=0x2BFF // stars, arrows used as emoji
            | 0x2300..=0x23FF // watch, hourglass, media keys
            | 0xFE00..=0xFE0F // variation selectors
            | 0x200D          // zero-width joiner
            | 0x20E3          // keycap
            | 0xE0020..=0xE007F // tag sequences
    )
}

/// Cut to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    cut.trim_end().to_string()
}

/// `@handle` form of the subject's public handle; empty stays empty.
pub fn format_handle(handle: &str) -> String {
    let h = handle.trim().trim_start_matches('@');
    if h.is_empty() {
        String::new()
    } else {
        format!("@{h}")
    }
}

/// Caption + blank line + handle.
pub fn compose_message(caption: &str, handle: &str) -> String {
    let handle = format_handle(handle);
    match (caption.is_empty(), handle.is_empty()) {
        (false, false) => format!("{caption}\n\n{handle}"),
        (false, true) => caption.to_string(),
        (true, _) => handle,
    }
}

/// Deterministic per-post delivery key (hex SHA-256 of `agent:post`), sent
/// with each dispatch so a deduplicating gateway can drop a replay.
pub fn dedup_key(agent_id: &str, post_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(b":");
    hasher.update(post_id.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
