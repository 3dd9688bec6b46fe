//! The self-improvement ledger (component J, spec.md §4.J): errors feed
//! pattern detection, patterns seed insights, insights promote to rules.

pub mod errors;
pub mod insights;
pub mod patterns;
pub mod rules;

pub use errors::{log_error, resolve_error};
pub use insights::{
    downvote_insight, edit_insight, list_insights, record_insight, upvote_insight, upvote_insight_by_id,
};
pub use patterns::{
    detect_patterns, error_patterns, full_report, improvement_trend, insight_candidates, rule_effectiveness,
    suggest_after_error, PatternMatch, PatternSuggestion,
};
pub use rules::{
    activate_rule, add_manual_rule, fire_rule, get_rules_for_context, list_rules, promote_insight,
    record_rule_fire, retire_rule, suspend_rule,
};
