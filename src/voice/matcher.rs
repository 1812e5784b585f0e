//! Transcript-to-option matching.
//!
//! A pure priority chain: ordinal ("option two"), yes/no shortcut for
//! two-option permission prompts, direct substring, fuzzy similarity, and
//! finally verbatim fallback. The first strategy that matches wins.

use strsim::normalized_levenshtein;

use crate::events::{BlockReason, MatchMethod};

/// Fuzzy matches below this ratio are treated as no-match.
const FUZZY_THRESHOLD: f64 = 0.6;

/// Confidence assigned when options exist but nothing matched; low enough
/// that the engine's dispatch gate always rejects it.
const FALLTHROUGH_CONFIDENCE: f64 = 0.3;

const ORDINAL_STRIP_WORDS: &[&str] = &["option", "the", "number", "pick"];

const ORDINAL_WORDS: &[(&str, usize)] = &[
    ("one", 0), ("first", 0), ("1", 0),
    ("two", 1), ("second", 1), ("2", 1),
    ("three", 2), ("third", 2), ("3", 2),
    ("four", 3), ("fourth", 3), ("4", 3),
    ("five", 4), ("fifth", 4), ("5", 4),
    ("six", 5), ("sixth", 5), ("6", 5),
    ("seven", 6), ("seventh", 6), ("7", 6),
    ("eight", 7), ("eighth", 7), ("8", 7),
    ("nine", 8), ("ninth", 8), ("9", 8),
    ("ten", 9), ("tenth", 9), ("10", 9),
];

const YES_WORDS: &[&str] = &["yes", "yeah", "yep", "sure", "allow"];
const YES_PHRASES: &[&str] = &["go ahead"];
const NO_WORDS: &[&str] = &["no", "nah", "nope", "deny", "reject"];

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub text: String,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// Match a transcript to the best option. Pure function of its inputs.
pub fn match_response(
    transcript: &str,
    options: Option<&[String]>,
    block_reason: Option<BlockReason>,
) -> MatchResult {
    let Some(options) = options.filter(|o| !o.is_empty()) else {
        return MatchResult {
            text: transcript.trim().to_string(),
            confidence: 1.0,
            method: MatchMethod::Verbatim,
        };
    };

    if let Some(result) = try_ordinal(transcript, options) {
        return result;
    }
    if let Some(result) = try_yes_no(transcript, options, block_reason) {
        return result;
    }
    if let Some(result) = try_direct(transcript, options) {
        return result;
    }
    if let Some(result) = try_fuzzy(transcript, options) {
        return result;
    }

    // Nothing matched: report what was heard, below the dispatch gate.
    MatchResult {
        text: transcript.trim().to_string(),
        confidence: FALLTHROUGH_CONFIDENCE,
        method: MatchMethod::Verbatim,
    }
}

fn ordinal_index(word: &str) -> Option<usize> {
    ORDINAL_WORDS
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, i)| *i)
}

fn try_ordinal(transcript: &str, options: &[String]) -> Option<MatchResult> {
    let lowered = transcript.to_lowercase();
    let words = lowered
        .split_whitespace()
        .filter(|w| !ORDINAL_STRIP_WORDS.contains(w));

    for word in words {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        if let Some(index) = ordinal_index(trimmed) {
            if index < options.len() {
                return Some(MatchResult {
                    text: options[index].clone(),
                    confidence: 0.95,
                    method: MatchMethod::Ordinal,
                });
            }
        }
    }
    None
}

/// Only applies to two-option permission prompts: affirmative picks the
/// first option, negative picks the second.
fn try_yes_no(
    transcript: &str,
    options: &[String],
    block_reason: Option<BlockReason>,
) -> Option<MatchResult> {
    if options.len() != 2 || block_reason != Some(BlockReason::PermissionPrompt) {
        return None;
    }

    let normalized = transcript.trim().to_lowercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    let affirmative = words.iter().any(|w| YES_WORDS.contains(w))
        || YES_PHRASES.iter().any(|p| normalized.contains(p));
    if affirmative {
        return Some(MatchResult {
            text: options[0].clone(),
            confidence: 0.9,
            method: MatchMethod::YesNo,
        });
    }

    if words.iter().any(|w| NO_WORDS.contains(w)) {
        return Some(MatchResult {
            text: options[1].clone(),
            confidence: 0.9,
            method: MatchMethod::YesNo,
        });
    }

    None
}

/// Case-insensitive containment in either direction; the longest matching
/// option wins.
fn try_direct(transcript: &str, options: &[String]) -> Option<MatchResult> {
    let transcript_lower = transcript.to_lowercase();

    let best = options
        .iter()
        .filter(|option| {
            let option_lower = option.to_lowercase();
            transcript_lower.contains(&option_lower) || option_lower.contains(&transcript_lower)
        })
        .max_by_key(|option| option.len())?;

    Some(MatchResult {
        text: best.clone(),
        confidence: 0.85,
        method: MatchMethod::Direct,
    })
}

fn try_fuzzy(transcript: &str, options: &[String]) -> Option<MatchResult> {
    let transcript_lower = transcript.to_lowercase();

    let (best_option, best_ratio) = options
        .iter()
        .map(|option| {
            let ratio = normalized_levenshtein(&transcript_lower, &option.to_lowercase());
            (option, ratio)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    if best_ratio >= FUZZY_THRESHOLD {
        return Some(MatchResult {
            text: best_option.clone(),
            confidence: best_ratio,
            method: MatchMethod::Fuzzy,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_options_returns_verbatim() {
        let result = match_response("  use the blue one  ", None, None);
        assert_eq!(result.text, "use the blue one");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.method, MatchMethod::Verbatim);

        let empty: Vec<String> = Vec::new();
        let result = match_response("anything", Some(&empty), None);
        assert_eq!(result.method, MatchMethod::Verbatim);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn ordinal_words_and_digits() {
        let opts = options(&["RS256", "HS256"]);
        for phrase in ["option one", "one", "first", "1", "the first one"] {
            let result = match_response(phrase, Some(&opts), None);
            assert_eq!(result.text, "RS256", "failed on {phrase:?}");
            assert_eq!(result.method, MatchMethod::Ordinal);
            assert_eq!(result.confidence, 0.95);
        }
        let result = match_response("number two", Some(&opts), None);
        assert_eq!(result.text, "HS256");
    }

    #[test]
    fn ordinal_ten_maps_to_index_nine() {
        let opts: Vec<String> = (1..=10).map(|i| format!("choice-{i}")).collect();
        let result = match_response("option ten", Some(&opts), None);
        assert_eq!(result.text, "choice-10");
        assert_eq!(result.method, MatchMethod::Ordinal);
    }

    #[test]
    fn ordinal_out_of_range_falls_through() {
        let opts = options(&["only"]);
        let result = match_response("option three", Some(&opts), None);
        assert_ne!(result.method, MatchMethod::Ordinal);
    }

    #[test]
    fn yes_no_requires_two_option_permission_prompt() {
        let opts = options(&["Allow", "Deny"]);

        let result = match_response("yes", Some(&opts), Some(BlockReason::PermissionPrompt));
        assert_eq!(result.text, "Allow");
        assert_eq!(result.method, MatchMethod::YesNo);
        assert_eq!(result.confidence, 0.9);

        let result = match_response("nope", Some(&opts), Some(BlockReason::PermissionPrompt));
        assert_eq!(result.text, "Deny");

        let result = match_response("go ahead", Some(&opts), Some(BlockReason::PermissionPrompt));
        assert_eq!(result.text, "Allow");

        // Wrong reason: no yes/no shortcut.
        let result = match_response("yes", Some(&opts), Some(BlockReason::Question));
        assert_ne!(result.method, MatchMethod::YesNo);

        // Three options: no shortcut either.
        let three = options(&["Allow", "Deny", "Ask later"]);
        let result = match_response("yes", Some(&three), Some(BlockReason::PermissionPrompt));
        assert_ne!(result.method, MatchMethod::YesNo);
    }

    #[test]
    fn direct_prefers_longest_match() {
        let opts = options(&["Run tests", "Run tests and lint"]);
        let result = match_response(
            "please run tests and lint now",
            Some(&opts),
            None,
        );
        assert_eq!(result.text, "Run tests and lint");
        assert_eq!(result.method, MatchMethod::Direct);
        assert_eq!(result.confidence, 0.85);
    }

    #[test]
    fn fuzzy_match_above_threshold() {
        let opts = options(&["continue", "abort"]);
        let result = match_response("continu", Some(&opts), None);
        // "continu" is a direct substring of "continue"; force fuzzy with a typo.
        assert!(result.method == MatchMethod::Direct || result.method == MatchMethod::Fuzzy);

        let result = match_response("contynue", Some(&opts), None);
        assert_eq!(result.method, MatchMethod::Fuzzy);
        assert_eq!(result.text, "continue");
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn unmatched_transcript_is_low_confidence_verbatim() {
        let opts = options(&["Allow", "Deny"]);
        let result = match_response("xylophone sandwich", Some(&opts), None);
        assert_eq!(result.method, MatchMethod::Verbatim);
        assert_eq!(result.text, "xylophone sandwich");
        assert!(result.confidence < 0.6);
    }

    #[test]
    fn matching_is_pure() {
        let opts = options(&["Allow", "Deny"]);
        let a = match_response("option one", Some(&opts), Some(BlockReason::PermissionPrompt));
        let b = match_response("option one", Some(&opts), Some(BlockReason::PermissionPrompt));
        assert_eq!(a, b);
    }
}
