//! Weighted token similarity between two prompts.
//!
//! Used by the response cache to decide whether a new human message is a
//! paraphrase of one it has already answered. The score is a weighted
//! Jaccard over the token sets, with per-token weights from the word-class
//! lexicon: shared verbs and nouns pull the score up hard, shared articles
//! and prepositions barely move it. An antonym guard pins the score to 0.0
//! when the prompts land on opposite intent verbs, however much their
//! remaining vocabulary overlaps.

use std::collections::{HashMap, HashSet};

use super::lexicon::{classify, stem_candidates, ANTONYM_PAIRS};

/// Lowercase and split on anything non-alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Similarity in `[0.0, 1.0]` between two prompts.
///
/// `similarity(a, b) = Σ min(w_a(t), w_b(t)) / Σ max(w_a(t), w_b(t))` over
/// the token union, where a token's weight is its word-class weight when
/// present and 0 when absent. Empty input on either side scores 0.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    if opposite_intent(&stem_set(&tokens_a), &stem_set(&tokens_b)) {
        return 0.0;
    }

    let weights_a = weighted_tokens(&tokens_a);
    let weights_b = weighted_tokens(&tokens_b);

    let mut min_sum = 0.0;
    let mut max_sum = 0.0;
    for (token, &wa) in &weights_a {
        match weights_b.get(token) {
            Some(&wb) => {
                min_sum += wa.min(wb);
                max_sum += wa.max(wb);
            }
            None => max_sum += wa,
        }
    }
    for (token, &wb) in &weights_b {
        if !weights_a.contains_key(token) {
            max_sum += wb;
        }
    }

    if max_sum == 0.0 {
        0.0
    } else {
        min_sum / max_sum
    }
}

/// Token set with word-class weights. Repeated tokens count once.
fn weighted_tokens(tokens: &[String]) -> HashMap<&str, f64> {
    let mut out = HashMap::with_capacity(tokens.len());
    for token in tokens {
        out.entry(token.as_str())
            .or_insert_with(|| classify(token).weight());
    }
    out
}

/// Every stem candidate of every token, for antonym matching across
/// inflections (`creating` vs `deleted` still trips the create/delete pair).
fn stem_set(tokens: &[String]) -> HashSet<String> {
    tokens
        .iter()
        .flat_map(|t| stem_candidates(t))
        .collect()
}

/// True when one side contains a member of a known antonym pair and the
/// other side contains the opposite member.
fn opposite_intent(stems_a: &HashSet<String>, stems_b: &HashSet<String>) -> bool {
    ANTONYM_PAIRS.iter().any(|(x, y)| {
        (stems_a.contains(*x) && stems_b.contains(*y))
            || (stems_a.contains(*y) && stems_b.contains(*x))
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
