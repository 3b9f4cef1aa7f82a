//! Token counting and token-budget batching.
//!
//! The counter prefers an exact count from a locally bundled tokenizer
//! snapshot (`models/deepseek_v3_tokenizer/tokenizer.json`). When the
//! snapshot is absent or the tokenizer fails, it falls back to a character
//! heuristic tuned for mixed CJK/Latin project text:
//!
//! ```text
//! ceil(cjk_chars / 1.5) + ceil(other_chars / 4)
//! ```
//!
//! The heuristic is used only for budgeting, never billing; it may
//! undershoot by up to ~30% on pathological text, which the callers'
//! slack reserves absorb.

use std::sync::OnceLock;
use tokenizers::Tokenizer;

use crate::config::Paths;

static COUNTER: OnceLock<TokenCounter> = OnceLock::new();

/// Process-wide token counter, read-only after initialization.
pub struct TokenCounter {
    tokenizer: Option<Tokenizer>,
}

impl TokenCounter {
    /// The shared counter. Loads the tokenizer snapshot on first access;
    /// any load failure silently selects the heuristic path.
    pub fn shared() -> &'static TokenCounter {
        COUNTER.get_or_init(|| {
            let tokenizer = Paths::discover()
                .ok()
                .map(|paths| paths.tokenizer_dir().join("tokenizer.json"))
                .filter(|p| p.exists())
                .and_then(|p| match Tokenizer::from_file(&p) {
                    Ok(t) => {
                        tracing::debug!(path = %p.display(), "loaded tokenizer snapshot");
                        Some(t)
                    }
                    Err(e) => {
                        tracing::warn!("tokenizer load failed, using estimate mode: {}", e);
                        None
                    }
                });
            TokenCounter { tokenizer }
        })
    }

    /// A counter that always estimates (tests).
    pub fn estimating() -> TokenCounter {
        TokenCounter { tokenizer: None }
    }

    /// Count tokens for a text. Falls back to the heuristic on any
    /// tokenizer error.
    pub fn count(&self, text: &str) -> usize {
        if let Some(tokenizer) = &self.tokenizer {
            match tokenizer.encode(text, false) {
                Ok(encoding) => return encoding.get_ids().len(),
                Err(e) => {
                    tracing::warn!("token encode failed, using estimate: {}", e);
                }
            }
        }
        estimate_tokens(text)
    }
}

/// Heuristic token estimate: CJK ideographs average ~1.5 chars per token,
/// everything else ~4 chars per token.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    // ceil(cjk / 1.5) == ceil(cjk * 2 / 3)
    (cjk * 2).div_ceil(3) + other.div_ceil(4)
}

/// CJK unified ideograph ranges (base, extension A, compatibility,
/// extension B).
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

/// Greedy token-budget split over an ordered sequence.
///
/// Starting at `start`, accumulates items while the summed estimate stays
/// strictly below `threshold` (the threshold itself is treated as already
/// full). At least one item is always taken, even when its own estimate
/// exceeds the threshold (the caller decides how to shrink such an item).
/// Returns `(batch, next_start, batch_tokens)`; concatenating the batches
/// over successive calls reproduces the input exactly.
pub fn split_by_budget<'a, T, F>(
    items: &'a [T],
    estimate: F,
    threshold: usize,
    start: usize,
) -> (&'a [T], usize, usize)
where
    F: Fn(&T) -> usize,
{
    if start >= items.len() {
        return (&[], start, 0);
    }

    let mut end = start;
    let mut total = 0usize;
    while end < items.len() {
        let cost = estimate(&items[end]);
        if end > start && total + cost >= threshold {
            break;
        }
        total += cost;
        end += 1;
        // A single oversized item forms a batch of one.
        if total > threshold {
            break;
        }
    }
    (&items[start..end], end, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_latin_only() {
        // 16 non-CJK chars -> ceil(16/4) = 4
        assert_eq!(estimate_tokens("abcdefghijklmnop"), 4);
    }

    #[test]
    fn test_estimate_cjk_only() {
        // 3 ideographs -> ceil(3/1.5) = 2
        assert_eq!(estimate_tokens("订单页"), 2);
    }

    #[test]
    fn test_estimate_mixed() {
        // "订单" -> ceil(2/1.5)=2, "page" -> 1
        assert_eq!(estimate_tokens("订单page"), 3);
    }

    #[test]
    fn test_counter_without_snapshot_estimates() {
        let counter = TokenCounter::estimating();
        assert_eq!(counter.count("abcd"), 1);
    }

    #[test]
    fn test_split_matches_expected_batches() {
        // [800, 900, 900, 1100] at T=2000 splits into [[800,900],[900],[1100]]
        let items = [800usize, 900, 900, 1100];
        let est = |v: &usize| *v;

        let (b1, next, t1) = split_by_budget(&items, est, 2000, 0);
        assert_eq!(b1, &[800, 900]);
        assert_eq!(t1, 1700);

        let (b2, next2, _) = split_by_budget(&items, est, 2000, next);
        assert_eq!(b2, &[900]);

        let (b3, next3, t3) = split_by_budget(&items, est, 2000, next2);
        assert_eq!(b3, &[1100]);
        assert_eq!(t3, 1100);
        assert_eq!(next3, items.len());
    }

    #[test]
    fn test_split_oversized_single_item() {
        let items = [5000usize, 10];
        let (batch, next, total) = split_by_budget(&items, |v| *v, 2000, 0);
        assert_eq!(batch, &[5000]);
        assert_eq!(next, 1);
        assert_eq!(total, 5000);
    }

    #[test]
    fn test_split_covers_input_without_gaps() {
        let items: Vec<usize> = (0..37).map(|i| 100 + i).collect();
        let mut start = 0;
        let mut seen = Vec::new();
        while start < items.len() {
            let (batch, next, total) = split_by_budget(&items, |v| *v, 500, start);
            assert!(!batch.is_empty(), "forward progress stalled at {}", start);
            assert!(total <= 500 || batch.len() == 1);
            seen.extend_from_slice(batch);
            start = next;
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn test_split_past_end_is_empty() {
        let items = [1usize, 2];
        let (batch, next, total) = split_by_budget(&items, |v| *v, 10, 2);
        assert!(batch.is_empty());
        assert_eq!(next, 2);
        assert_eq!(total, 0);
    }
}
