//! Family-safe content filter for prompt values and rendered stories.
//!
//! Intentionally small and self-contained so it can be swapped for a hosted
//! moderation API without touching the state machine: callers only see the
//! [`moderation_block_reason`] predicate.

/// Blocked terms, lowercase ASCII. Matched whole-word after normalization.
const BLOCKED_TERMS: &[&str] = &[
    // Sexual content
    "porn", "porno", "pussy", "dick", "cock", "penis", "vagina", "boob", "boobs", "tits", "tit",
    "cum", "sex", "sexy", "horny", "rape",
    // Slurs / hate
    "nazi", "hitler",
    // Violence / terror (coarse filter; can be refined)
    "terrorist",
    // General profanity
    "fuck", "fucking", "shit", "bitch", "cunt", "asshole", "bastard", "motherfucker",
];

/// Leetspeak folds applied before matching.
fn fold_leet(c: char) -> char {
    match c {
        '@' => 'a',
        '$' => 's',
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '8' => 'b',
        '9' => 'g',
        '!' => 'i',
        '+' => 't',
        other => other,
    }
}

/// Lowercase, fold leetspeak, turn punctuation into spaces (so inserted
/// separators like `f.u.c.k` become word gaps), and collapse runs of three
/// or more repeated characters down to two (`fuuuuck` -> `fuuck`).
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for raw in text.chars() {
        let folded = fold_leet(raw.to_ascii_lowercase());
        let c = if folded.is_ascii_alphanumeric() { folded } else { ' ' };
        if Some(c) == prev {
            run += 1;
            if run >= 2 {
                continue;
            }
        } else {
            prev = Some(c);
            run = 0;
        }
        out.push(c);
    }
    out
}

/// Returns the blocked term found in `text`, if any.
///
/// A term matches when some run of consecutive whitespace-separated tokens in
/// the normalized text concatenates to exactly the term. A single token run
/// is a whole-word match; longer runs catch spaced-out spellings (`f u c k`).
pub fn find_blocked_term(text: &str) -> Option<&'static str> {
    let normalized = normalize(text);
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    for &term in BLOCKED_TERMS {
        for start in 0..tokens.len() {
            let mut joined = String::new();
            for token in &tokens[start..] {
                joined.push_str(token);
                if joined.len() >= term.len() {
                    break;
                }
            }
            if joined == term {
                return Some(term);
            }
        }
    }
    None
}

/// Friendly user-facing block reason, or None if the text is allowed.
pub fn moderation_block_reason(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    find_blocked_term(text).map(|_| {
        "That response includes language we can't accept. \
         Please try a different word or phrase."
            .to_string()
    })
}
