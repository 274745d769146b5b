//! Pure, side-effect-free string similarity primitives (§4.5). Every
//! function here is deterministic and allocation-light enough to run
//! inside the resolver's O(n^2) fuzzy-matching pass.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static ABBREVIATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("corp", "corporation"),
        ("co", "company"),
        ("inc", "incorporated"),
        ("ltd", "limited"),
        ("llc", "llc"),
        ("llp", "llp"),
        ("assn", "association"),
        ("dept", "department"),
        ("natl", "national"),
        ("intl", "international"),
        ("mfg", "manufacturing"),
        ("bros", "brothers"),
    ])
});

fn bigrams(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 1 {
        let padded = format!(" {s} ");
        let padded_chars: Vec<char> = padded.chars().collect();
        return padded_chars.windows(2).map(|w| w.iter().collect()).collect();
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// Sørensen–Dice similarity over character bigrams: 2·|A∩B| / (|A|+|B|),
/// with multiset (multiplicity-preserving) intersection.
pub fn dice_similarity(a: &str, b: &str) -> f32 {
    let bigrams_a = bigrams(a);
    let bigrams_b = bigrams(b);

    if bigrams_a.is_empty() && bigrams_b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        return 0.0;
    }

    let mut counts_a: HashMap<&str, usize> = HashMap::new();
    for g in &bigrams_a {
        *counts_a.entry(g.as_str()).or_insert(0) += 1;
    }
    let mut counts_b: HashMap<&str, usize> = HashMap::new();
    for g in &bigrams_b {
        *counts_b.entry(g.as_str()).or_insert(0) += 1;
    }

    let mut intersection = 0usize;
    for (gram, count_a) in &counts_a {
        if let Some(count_b) = counts_b.get(gram) {
            intersection += (*count_a).min(*count_b);
        }
    }

    (2.0 * intersection as f32) / (bigrams_a.len() + bigrams_b.len()) as f32
}

/// Splits on whitespace, sorts tokens lexicographically, rejoins, then
/// applies Dice similarity.
pub fn token_sort_similarity(a: &str, b: &str) -> f32 {
    dice_similarity(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// True iff the uppercased first letters of each token match after
/// trimming any shared leading tokens.
pub fn initials_match(a: &str, b: &str) -> bool {
    let tokens_a: Vec<&str> = a.split_whitespace().collect();
    let tokens_b: Vec<&str> = b.split_whitespace().collect();

    let shared_prefix_len = tokens_a
        .iter()
        .zip(tokens_b.iter())
        .take_while(|(x, y)| x.eq_ignore_ascii_case(y))
        .count();

    let initials = |tokens: &[&str]| -> String {
        tokens[shared_prefix_len.min(tokens.len())..]
            .iter()
            .filter_map(|t| t.chars().next())
            .map(|c| c.to_ascii_uppercase())
            .collect::<String>()
    };

    let initials_a = initials(&tokens_a);
    let initials_b = initials(&tokens_b);
    !initials_a.is_empty() && initials_a == initials_b
}

/// Expands known domain abbreviations token-by-token before comparison.
pub fn expand_abbreviations(s: &str) -> String {
    s.split_whitespace()
        .map(|token| {
            let stripped = token.trim_end_matches('.');
            let key = stripped.to_lowercase();
            ABBREVIATIONS.get(key.as_str()).copied().unwrap_or(stripped)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips whitespace and punctuation, uppercases; case numbers compare
/// exactly equal on this normalized form.
pub fn normalize_case_number(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

pub fn case_numbers_match(a: &str, b: &str) -> bool {
    normalize_case_number(a) == normalize_case_number(b)
}

/// Parses both strings as decimal amounts (stripping currency symbols and
/// thousands separators) and compares within a relative tolerance.
pub fn amounts_match(a: &str, b: &str, tolerance: f64) -> bool {
    match (parse_amount(a), parse_amount(b)) {
        (Some(x), Some(y)) => {
            if x == 0.0 && y == 0.0 {
                return true;
            }
            let diff = (x - y).abs();
            let denom = x.abs().max(y.abs());
            diff / denom <= tolerance
        }
        _ => false,
    }
}

fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// True iff the tokens of the shorter string appear, in order, within the
/// longer string's tokens (a subsequence check, not a substring check).
pub fn location_contains(a: &str, b: &str) -> bool {
    let normalize_token = |t: &str| -> String {
        t.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase()
    };
    let tokens_a: Vec<String> = a.split_whitespace().map(normalize_token).collect();
    let tokens_b: Vec<String> = b.split_whitespace().map(normalize_token).collect();

    let (shorter, longer) = if tokens_a.len() <= tokens_b.len() {
        (&tokens_a, &tokens_b)
    } else {
        (&tokens_b, &tokens_a)
    };

    if shorter.is_empty() {
        return false;
    }

    let mut cursor = 0;
    for token in longer {
        if cursor < shorter.len() && *token == shorter[cursor] {
            cursor += 1;
        }
    }
    cursor == shorter.len()
}
