use chrono::{DateTime, Utc};
use ledgerfill_core::{Rule, RuleContext, RuleSet};
use std::collections::HashSet;

/// Merges per-level rule lists into one rule set.
///
/// `levels[i]` holds the rules mined at level `i + 1`; each rule is tagged with
/// that level as its priority. When several levels emit a rule with the same
/// pattern and context, the one from the earliest level wins. The result is
/// ranked by [`ledgerfill_core::rule_order`].
pub fn combine(levels: Vec<Vec<Rule>>, created: DateTime<Utc>) -> RuleSet {
    let mut seen: HashSet<(String, Option<RuleContext>)> = HashSet::new();
    let mut merged = Vec::new();
    let mut dropped = 0usize;

    for (idx, rules) in levels.into_iter().enumerate() {
        let priority = idx as u32 + 1;
        for mut rule in rules {
            rule.priority = priority;
            if seen.insert((rule.pattern.clone(), rule.context.clone())) {
                merged.push(rule);
            } else {
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, "Dropped rules already emitted at a higher level");
    }

    RuleSet::new(merged, created)
}
