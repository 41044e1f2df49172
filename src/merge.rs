// src/merge.rs
//! # Name-Quality Merge Policy
//! Pure comparator deciding whether a newly observed display name should
//! replace the one already stored for a voter. No I/O.
//!
//! Rules are evaluated top to bottom; the first rule that reaches a verdict
//! wins and nothing below it is consulted.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Prefix of synthesized names (`"Contato 1234"`).
pub const PLACEHOLDER_PREFIX: &str = "Contato ";

/// Which rule settled the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    EmptyOrIdentical,
    NoPlaceholderDowngrade,
    ReplacesPlaceholder,
    NoTrailingInitial,
    MoreWords,
    Longer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Accept(MergeRule),
    Reject(MergeRule),
}

impl MergeDecision {
    pub fn accepted(&self) -> bool {
        matches!(self, MergeDecision::Accept(_))
    }

    pub fn rule(&self) -> MergeRule {
        match self {
            MergeDecision::Accept(r) | MergeDecision::Reject(r) => *r,
        }
    }
}

/// Build the placeholder for a canonical phone: prefix + last 4 digits.
pub fn placeholder_for(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("{PLACEHOLDER_PREFIX}{tail}")
}

/// True for synthesized names and for "names" that are really just a phone
/// number (digits with optional `+`, spaces, dashes or parentheses).
pub fn is_placeholder(name: &str) -> bool {
    let t = name.trim();
    if t.is_empty() {
        return false;
    }
    if let Some(rest) = t.strip_prefix(PLACEHOLDER_PREFIX.trim_end()) {
        let rest = rest.trim();
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    let digit_count = t.chars().filter(|c| c.is_ascii_digit()).count();
    digit_count >= 4
        && t
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
}

/// `"João S."`, `"Ana P"`: last word is a single letter, optionally dotted.
pub fn has_trailing_initial(name: &str) -> bool {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"\S\s+\p{L}\.?$").expect("static regex"));
    re.is_match(name.trim())
}

fn word_count(name: &str) -> usize {
    name.split_whitespace().count()
}

/// Decide whether `new` should overwrite `existing`.
pub fn should_replace(existing: &str, new: &str) -> MergeDecision {
    let existing = existing.trim();
    let new = new.trim();

    // 1) Nothing to gain
    if new.is_empty() || new == existing {
        return MergeDecision::Reject(MergeRule::EmptyOrIdentical);
    }

    let new_ph = is_placeholder(new);
    let old_ph = is_placeholder(existing) || existing.is_empty();

    // 2) Never downgrade a real name
    if new_ph && !old_ph {
        return MergeDecision::Reject(MergeRule::NoPlaceholderDowngrade);
    }

    // 3) Any real name beats a placeholder
    if old_ph && !new_ph {
        return MergeDecision::Accept(MergeRule::ReplacesPlaceholder);
    }

    // 4) Full surname beats an abbreviated one
    match (has_trailing_initial(existing), has_trailing_initial(new)) {
        (true, false) => return MergeDecision::Accept(MergeRule::NoTrailingInitial),
        (false, true) => return MergeDecision::Reject(MergeRule::NoTrailingInitial),
        _ => {}
    }

    // 5) More words
    let (wo, wn) = (word_count(existing), word_count(new));
    if wn != wo {
        return if wn > wo {
            MergeDecision::Accept(MergeRule::MoreWords)
        } else {
            MergeDecision::Reject(MergeRule::MoreWords)
        };
    }

    // 6) Longer string
    if new.chars().count() > existing.chars().count() {
        MergeDecision::Accept(MergeRule::Longer)
    } else {
        MergeDecision::Reject(MergeRule::Longer)
    }
}
