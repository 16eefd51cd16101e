//! # Token-Scoped Sentiment
//! Lexicon polarity in `[-1, 1]` over the passages that actually talk about
//! the token: the title (double-weighted when it mentions the token) plus
//! paragraphs of meaningful length mentioning it. When nothing mentions the
//! token, the leading content slice stands in. The article score is the mean
//! over selected passages.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("bundled lexicon parses")
});

/// Paragraphs shorter than this are too thin to score.
const MIN_PARAGRAPH_CHARS: usize = 50;
/// Fallback slice when no passage mentions the token.
const LEAD_SLICE_CHARS: usize = 500;
/// Lexicon entries weigh at most ±2; used to normalize into [-1, 1].
const MAX_WORD_WEIGHT: f64 = 2.0;

/// Mean polarity over token-relevant passages of one article.
pub fn article_sentiment(title: &str, content: &str, token: &str) -> f64 {
    let passages = select_passages(title, content, token);
    let scores: Vec<f64> = passages
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| passage_polarity(p))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Polarity of one passage in [-1, 1]: signed lexicon score normalized by
/// the number of matched words, with a negation window of up to three
/// preceding tokens flipping a word's sign.
pub fn passage_polarity(text: &str) -> f64 {
    let tokens: Vec<String> = tokenize(text).collect();
    let mut score: i32 = 0;
    let mut hits: usize = 0;

    for i in 0..tokens.len() {
        let base = *LEXICON.get(tokens[i].as_str()).unwrap_or(&0);
        if base == 0 {
            continue;
        }
        let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
        score += if negated { -base } else { base };
        hits += 1;
    }

    if hits == 0 {
        return 0.0;
    }
    (f64::from(score) / (hits as f64 * MAX_WORD_WEIGHT)).clamp(-1.0, 1.0)
}

fn select_passages(title: &str, content: &str, token: &str) -> Vec<String> {
    let token_lc = token.to_ascii_lowercase();
    let mut passages = Vec::new();

    if title.to_ascii_lowercase().contains(&token_lc) {
        // Title counts twice.
        passages.push(title.to_string());
        passages.push(title.to_string());
    }

    for para in content.split('\n') {
        let trimmed = para.trim();
        if trimmed.chars().count() > MIN_PARAGRAPH_CHARS
            && trimmed.to_ascii_lowercase().contains(&token_lc)
        {
            passages.push(trimmed.to_string());
        }
    }

    if passages.is_empty() {
        passages.push(prefix_chars(content, LEAD_SLICE_CHARS).to_string());
    }
    passages
}

/// Char-safe prefix (byte slicing could split a UTF-8 sequence).
pub(crate) fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Alphanumeric tokens, lower-cased.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

fn is_negator(tok: &str) -> bool {
    // Contractions tokenize as "isn t", so the stem alone is the signal.
    matches!(
        tok,
        "not" | "no" | "never" | "cannot" | "without" | "isn" | "wasn" | "aren" | "doesn" | "didn"
    )
}
