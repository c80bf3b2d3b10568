//! Token estimation for providers that do not report usage.
//!
//! Heuristic: whitespace-delimited words × 1.3, truncated.

const TOKENS_PER_WORD: f64 = 1.3;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> u32 {
    from_words(text.split_whitespace().count())
}

/// Estimate prompt and response together.
///
/// The combined count is truncated once; the output side takes whatever the
/// input side's truncation left over, so the two always add up to it.
pub fn estimate_exchange(input: &str, output: &str) -> (u32, u32) {
    let input_tokens = estimate_tokens(input);
    let total = from_words(input.split_whitespace().count() + output.split_whitespace().count());
    (input_tokens, total - input_tokens)
}

fn from_words(words: usize) -> u32 {
    (words as f64 * TOKENS_PER_WORD) as u32
}
