//! Progressive-tax truncation: fit a set of named text items into a token
//! budget so that small items are preserved and large items absorb the
//! shortfall in proportion to their size.
//!
//! The tax works in three modes:
//!
//! - `no-truncation`: everything already fits; every item keeps its tokens.
//! - `protection`: items smaller than the average per-item deficit are
//!   untouched; each remaining item gives up `(tokens / above_sum) * deficit`
//!   tokens, so the after-sum lands on the target by construction.
//! - `fallback`: the protected items alone already exceed the target, so
//!   every item is scaled by `target / sum` instead.

use serde::{Deserialize, Serialize};

use crate::defaults::{CHARS_PER_TOKEN, TRUNCATION_MARKER};

/// One named input to the allocator.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncationItem {
    pub name: String,
    /// Estimated token size; see [`estimate_tokens`].
    pub tokens: u64,
}

impl TruncationItem {
    pub fn new(name: impl Into<String>, tokens: u64) -> Self {
        Self {
            name: name.into(),
            tokens,
        }
    }

    /// Build an item from content, estimating its token size.
    pub fn from_content(name: impl Into<String>, content: &str) -> Self {
        Self::new(name, estimate_tokens(content))
    }
}

/// Estimate tokens for a piece of text: `ceil(chars / 4)`.
pub fn estimate_tokens(content: &str) -> u64 {
    (content.chars().count() as u64).div_ceil(CHARS_PER_TOKEN as u64)
}

/// Which branch of the algorithm produced a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TruncationMode {
    #[serde(rename = "no-truncation")]
    NoTruncation,
    #[serde(rename = "protection")]
    Protection,
    #[serde(rename = "fallback")]
    Fallback,
}

impl TruncationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TruncationMode::NoTruncation => "no-truncation",
            TruncationMode::Protection => "protection",
            TruncationMode::Fallback => "fallback",
        }
    }
}

/// Per-item outcome of the allocator.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub name: String,
    /// Token size the item came in with.
    pub tokens: u64,
    /// Tokens the item may keep. Fractional in fallback mode.
    pub allocated_tokens: f64,
    /// Character budget: `floor(allocated_tokens * 4)`.
    pub allocated_chars: usize,
    pub truncated: bool,
    pub protected: bool,
}

/// Aggregate statistics for one allocator run.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncationStats {
    pub total_before: u64,
    pub total_after: f64,
    pub target: i64,
    pub items_protected: usize,
    pub items_truncated: usize,
    pub mode: TruncationMode,
}

/// An allocator run: per-item allocations in input order plus statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncationPlan {
    pub allocations: Vec<Allocation>,
    pub stats: TruncationStats,
}

/// Decide how many tokens each item keeps under `target`.
///
/// Never emits a negative allocation. When truncation occurs the after-sum
/// matches `target` to within rounding; otherwise it equals the before-sum.
pub fn allocate_budget(items: &[TruncationItem], target: i64) -> TruncationPlan {
    let total_before: u64 = items.iter().map(|i| i.tokens).sum();

    if items.is_empty() || (target >= 0 && total_before <= target as u64) {
        let allocations = items
            .iter()
            .map(|item| Allocation {
                name: item.name.clone(),
                tokens: item.tokens,
                allocated_tokens: item.tokens as f64,
                allocated_chars: item.tokens as usize * CHARS_PER_TOKEN,
                truncated: false,
                protected: false,
            })
            .collect();
        return TruncationPlan {
            allocations,
            stats: TruncationStats {
                total_before,
                total_after: total_before as f64,
                target,
                items_protected: 0,
                items_truncated: 0,
                mode: TruncationMode::NoTruncation,
            },
        };
    }

    let sum = total_before as f64;
    let deficit = sum - target as f64;
    let avg_tax = deficit / items.len() as f64;
    let below_sum: f64 = items
        .iter()
        .filter(|i| (i.tokens as f64) < avg_tax)
        .map(|i| i.tokens as f64)
        .sum();

    let (mode, allocations): (TruncationMode, Vec<Allocation>) = if below_sum > target as f64 {
        // The small items alone overshoot the budget: flat proportional cut.
        let ratio = target.max(0) as f64 / sum;
        let allocations = items
            .iter()
            .map(|item| {
                let allocated = item.tokens as f64 * ratio;
                make_allocation(item, allocated, false)
            })
            .collect();
        (TruncationMode::Fallback, allocations)
    } else {
        // Small items are protected; the rest absorb the deficit by size.
        let above_sum = sum - below_sum;
        let allocations = items
            .iter()
            .map(|item| {
                let tokens = item.tokens as f64;
                if tokens < avg_tax {
                    make_allocation(item, tokens, true)
                } else {
                    let allocated = (tokens - (tokens / above_sum) * deficit).max(0.0);
                    make_allocation(item, allocated, false)
                }
            })
            .collect();
        (TruncationMode::Protection, allocations)
    };

    let total_after: f64 = allocations.iter().map(|a| a.allocated_tokens).sum();
    let items_protected = allocations.iter().filter(|a| a.protected).count();
    let items_truncated = allocations.iter().filter(|a| a.truncated).count();

    TruncationPlan {
        allocations,
        stats: TruncationStats {
            total_before,
            total_after,
            target,
            items_protected,
            items_truncated,
            mode,
        },
    }
}

fn make_allocation(item: &TruncationItem, allocated_tokens: f64, protected: bool) -> Allocation {
    Allocation {
        name: item.name.clone(),
        tokens: item.tokens,
        allocated_tokens,
        allocated_chars: (allocated_tokens * CHARS_PER_TOKEN as f64).floor() as usize,
        truncated: allocated_tokens < item.tokens as f64,
        protected,
    }
}

/// Cut `content` down to `allocated_chars`, ending in the truncation marker.
///
/// Content already within budget passes through untouched. The cut point is
/// a character boundary, so multi-byte text stays valid.
pub fn render_truncated(content: &str, allocated_chars: usize) -> String {
    let len = content.chars().count();
    if len <= allocated_chars {
        return content.to_string();
    }
    if allocated_chars == 0 {
        return String::new();
    }
    let keep = allocated_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = content.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(spec: &[(&str, u64)]) -> Vec<TruncationItem> {
        spec.iter()
            .map(|(name, tokens)| TruncationItem::new(*name, *tokens))
            .collect()
    }

    fn allocation<'a>(plan: &'a TruncationPlan, name: &str) -> &'a Allocation {
        plan.allocations
            .iter()
            .find(|a| a.name == name)
            .expect("allocation present")
    }

    #[test]
    fn everything_fits_is_a_no_op() {
        let plan = allocate_budget(&items(&[("a", 100), ("b", 200)]), 1000);
        assert_eq!(plan.stats.mode, TruncationMode::NoTruncation);
        assert_eq!(plan.stats.total_after, 300.0);
        assert_eq!(plan.stats.items_truncated, 0);
        assert_eq!(allocation(&plan, "a").allocated_tokens, 100.0);
        assert_eq!(allocation(&plan, "a").allocated_chars, 400);
        assert!(!allocation(&plan, "b").truncated);
    }

    #[test]
    fn one_giant_file_absorbs_the_whole_deficit() {
        let plan = allocate_budget(
            &items(&[("a", 1000), ("b", 1000), ("c", 10000), ("d", 300_000)]),
            100_000,
        );
        assert_eq!(plan.stats.mode, TruncationMode::Protection);
        assert_eq!(plan.stats.items_protected, 3);
        assert_eq!(plan.stats.items_truncated, 1);
        assert_eq!(allocation(&plan, "a").allocated_tokens, 1000.0);
        assert_eq!(allocation(&plan, "b").allocated_tokens, 1000.0);
        assert_eq!(allocation(&plan, "c").allocated_tokens, 10000.0);
        assert_eq!(allocation(&plan, "d").allocated_tokens, 88000.0);
        assert!(allocation(&plan, "c").protected);
        assert!(allocation(&plan, "d").truncated);
        assert!((plan.stats.total_after - 100_000.0).abs() < 1.0);
    }

    #[test]
    fn two_large_files_scale_by_size() {
        let plan = allocate_budget(
            &items(&[("a", 1000), ("b", 1000), ("c", 100_000), ("d", 200_000)]),
            100_000,
        );
        assert_eq!(plan.stats.mode, TruncationMode::Protection);
        assert_eq!(allocation(&plan, "a").allocated_tokens, 1000.0);
        assert_eq!(allocation(&plan, "b").allocated_tokens, 1000.0);
        // c and d each retain ~32.7% of their tokens.
        let c = allocation(&plan, "c").allocated_tokens;
        let d = allocation(&plan, "d").allocated_tokens;
        assert!((c - 32_666.67).abs() < 1.0, "c = {c}");
        assert!((d - 65_333.33).abs() < 1.0, "d = {d}");
        assert!((d / c - 2.0).abs() < 1e-9, "d keeps twice c's tokens");
        assert!((plan.stats.total_after - 100_000.0).abs() < 1.0);
    }

    #[test]
    fn fallback_when_protected_items_exceed_target() {
        let plan = allocate_budget(&items(&[("a", 149), ("b", 251)]), 100);
        assert_eq!(plan.stats.mode, TruncationMode::Fallback);
        assert_eq!(plan.stats.items_protected, 0);
        assert_eq!(plan.stats.items_truncated, 2);
        assert!((allocation(&plan, "a").allocated_tokens - 37.25).abs() < 1e-9);
        assert!((allocation(&plan, "b").allocated_tokens - 62.75).abs() < 1e-9);
        assert_eq!(allocation(&plan, "a").allocated_chars, 149);
        assert!((plan.stats.total_after - 100.0).abs() < 1.0);
    }

    #[test]
    fn empty_input_yields_empty_plan() {
        let plan = allocate_budget(&[], 1000);
        assert!(plan.allocations.is_empty());
        assert_eq!(plan.stats.total_before, 0);
        assert_eq!(plan.stats.mode, TruncationMode::NoTruncation);
    }

    #[test]
    fn non_positive_target_allocates_zero() {
        for target in [0, -50] {
            let plan = allocate_budget(&items(&[("a", 100), ("b", 300)]), target);
            for a in &plan.allocations {
                assert_eq!(a.allocated_tokens, 0.0, "target {target}");
                assert_eq!(a.allocated_chars, 0);
            }
        }
    }

    #[test]
    fn single_item_above_budget_gets_exactly_the_target() {
        let plan = allocate_budget(&items(&[("only", 500_000)]), 64_000);
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].allocated_tokens, 64_000.0);
        assert!(plan.allocations[0].truncated);
        assert_eq!(plan.stats.items_protected, 0);
    }

    #[test]
    fn equal_tokens_get_equal_allocations() {
        for target in [10, 500, 5_000, 50_000] {
            let plan = allocate_budget(&items(&[("x", 40_000), ("y", 40_000)]), target);
            let x = allocation(&plan, "x").allocated_tokens;
            let y = allocation(&plan, "y").allocated_tokens;
            assert!((x - y).abs() < 1e-9, "target {target}: {x} vs {y}");
        }
    }

    #[test]
    fn allocations_never_negative_and_never_exceed_input() {
        let cases: &[(&[(&str, u64)], i64)] = &[
            (&[("a", 1), ("b", 1_000_000)], 10),
            (&[("a", 3), ("b", 5), ("c", 7)], 4),
            (&[("a", 100)], -1),
            (&[("a", 10), ("b", 20), ("c", 1_000)], 500),
        ];
        for (spec, target) in cases {
            let plan = allocate_budget(&items(spec), *target);
            for a in &plan.allocations {
                assert!(a.allocated_tokens >= 0.0);
                assert!(a.allocated_tokens <= a.tokens as f64 + 1e-9);
            }
        }
    }

    #[test]
    fn after_sum_matches_target_when_truncating() {
        let cases: &[(&[(&str, u64)], i64)] = &[
            (&[("a", 1000), ("b", 1000), ("c", 10_000), ("d", 300_000)], 100_000),
            (&[("a", 149), ("b", 251)], 100),
            (&[("a", 7), ("b", 13), ("c", 100_003)], 9_999),
        ];
        for (spec, target) in cases {
            let plan = allocate_budget(&items(spec), *target);
            assert!(
                (plan.stats.total_after - *target as f64).abs() < 1.0,
                "target {target}: after {}",
                plan.stats.total_after
            );
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn render_passes_through_when_within_budget() {
        assert_eq!(render_truncated("short", 100), "short");
        assert_eq!(render_truncated("exact", 5), "exact");
    }

    #[test]
    fn render_cuts_and_appends_marker() {
        let content = "0123456789".repeat(10);
        let out = render_truncated(&content, 40);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 40);
        assert!(out.starts_with("0123456789"));
    }

    #[test]
    fn render_zero_budget_is_empty() {
        assert_eq!(render_truncated("anything", 0), "");
    }

    #[test]
    fn render_is_utf8_safe() {
        let content = "żółć i łosoś — ".repeat(50);
        let out = render_truncated(&content, 30);
        assert!(out.ends_with(TRUNCATION_MARKER));
        // Would panic on an invalid boundary if sliced by bytes.
        assert!(out.chars().count() <= 30);
    }

    #[test]
    fn mode_strings() {
        assert_eq!(TruncationMode::NoTruncation.as_str(), "no-truncation");
        assert_eq!(TruncationMode::Protection.as_str(), "protection");
        assert_eq!(TruncationMode::Fallback.as_str(), "fallback");
    }
}
