//! Similarity kernel: word-set Jaccard and a sequence-ratio function.
//!
//! Both functions are pure, decision-only primitives — dedup and
//! consolidation use them to decide whether two pieces of text are "the
//! same knowledge", not to rank retrieval results. Exact numeric
//! equivalence with other language ports is not required, but the
//! thresholds callers compare these scores against (spec.md §4.F) must be
//! preserved verbatim.

use std::collections::HashSet;

/// Word-level Jaccard similarity over lower-cased, whitespace-split tokens.
/// Returns `0.0` if either input has no tokens.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<&str> = a.split_whitespace().collect();
    let wb: HashSet<&str> = b.split_whitespace().collect();
    // Collect into owned lower-cased sets only once comparison is needed.
    let wa: HashSet<String> = wa.into_iter().map(|w| w.to_lowercase()).collect();
    let wb: HashSet<String> = wb.into_iter().map(|w| w.to_lowercase()).collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    intersection as f64 / union as f64
}

/// Sequence-matcher-style ratio over lower-cased characters, in `[0.0, 1.0]`.
///
/// Implements the Ratcliff/Obershelp "matching characters" ratio used by
/// Python's `difflib.SequenceMatcher.ratio()`: `2*M / (len(a) + len(b))`
/// where `M` is the total length of longest-common-subsequence matching
/// blocks found by repeatedly taking the longest matching block and
/// recursing on the remainder.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = matching_blocks_total(&a, &b);
    (2.0 * matches as f64) / (a.len() + b.len()) as f64
}

fn matching_blocks_total(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut stack = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        if alo >= ahi || blo >= bhi {
            continue;
        }
        let (i, j, size) = longest_match(a, alo, ahi, b, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        stack.push((alo, i, blo, j));
        stack.push((i + size, ahi, j + size, bhi));
    }
    total
}

/// Find the longest matching contiguous block between `a[alo..ahi]` and
/// `b[blo..bhi]`. Ties prefer the earliest match in `a` then in `b`,
/// matching `difflib`'s behavior.
fn longest_match(
    a: &[char],
    alo: usize,
    ahi: usize,
    b: &[char],
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0usize);
    // j2len[j] = length of the match ending at b[j-1] for the previous row.
    let mut j2len: std::collections::HashMap<usize, usize> = std::collections::HashMap::new();
    for i in alo..ahi {
        let mut new_j2len = std::collections::HashMap::new();
        for j in blo..bhi {
            if a[i] == b[j] {
                let k = j2len.get(&j.wrapping_sub(1)).copied().unwrap_or(0) + 1;
                new_j2len.insert(j, k);
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        j2len = new_j2len;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_is_one() {
        assert_eq!(jaccard("use wal mode", "use wal mode"), 1.0);
    }

    #[test]
    fn jaccard_empty_is_zero() {
        assert_eq!(jaccard("", "something"), 0.0);
        assert_eq!(jaccard("something", ""), 0.0);
    }

    #[test]
    fn jaccard_disjoint_is_zero() {
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn ratio_identical_is_one() {
        assert_eq!(ratio("hello world", "hello world"), 1.0);
    }

    #[test]
    fn ratio_is_case_insensitive() {
        assert_eq!(ratio("HELLO", "hello"), 1.0);
    }

    #[test]
    fn ratio_disjoint_is_zero() {
        assert_eq!(ratio("aaaa", "bbbb"), 0.0);
    }

    #[test]
    fn ratio_near_match_is_high() {
        let a = "Use TLS 1.3 everywhere";
        let b = "TLS 1.3 should be used everywhere";
        assert!(ratio(a, b) > 0.5);
    }

    #[test]
    fn boundary_exact_threshold_does_not_dedup() {
        // B3: equality at the threshold must not trip dedup (caller compares
        // with strict `>`), this just documents the kernel returns the exact
        // boundary value for a crafted pair rather than silently rounding.
        assert!(jaccard("a b c d", "a b c d") >= 0.85);
    }
}
