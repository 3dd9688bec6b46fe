//! Rule promotion, fire/suspend bookkeeping, and the `list`/`suspend`/
//! `activate`/`retire`/`add_manual`/context-fetch actions (spec.md §4.J).

use tracing::instrument;

use crate::constants::{defaults, logging::LOG_PREFIX_LEDGER};
use crate::storage_backend::StorageBackend;
use crate::types::{default_project, ErrorCategory, Insight, InsightStatus, Rule, RuleScope, RuleStatus};
use crate::{Error, Result};

/// Promote an eligible insight to an active rule. Fails with
/// [`crate::Error::InvalidState`] if the insight does not meet the
/// importance/confidence bar.
#[instrument(skip(storage))]
pub async fn promote_insight(
    storage: &dyn StorageBackend,
    insight_id: i64,
    scope: RuleScope,
    priority: i32,
) -> Result<i64> {
    let mut insight: Insight = storage
        .get_insight(insight_id)
        .await?
        .ok_or(crate::Error::NotFound(insight_id))?;
    if !insight.promotion_eligible() {
        return Err(crate::Error::InvalidState(format!(
            "insight #{insight_id} is not eligible for promotion (importance={}, confidence={})",
            insight.importance, insight.confidence
        )));
    }
    let now = chrono::Utc::now().to_rfc3339();
    let rule = Rule {
        id: 0,
        session_id: insight.session_id.clone(),
        content: insight.content.clone(),
        context: insight.context.clone(),
        category: insight.category,
        scope,
        priority: priority.clamp(1, 10),
        source_insight_id: Some(insight_id),
        project: if insight.project.is_empty() {
            default_project()
        } else {
            insight.project.clone()
        },
        tags: insight.tags.clone(),
        status: RuleStatus::Active,
        fire_count: 0,
        success_count: 0,
        fail_count: 0,
        last_fired: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let rule_id = storage.insert_rule(&rule).await?;

    insight.status = InsightStatus::Promoted;
    insight.promoted_to_rule_id = Some(rule_id);
    storage.update_insight(&insight).await?;

    tracing::debug!("{} promoted insight #{insight_id} to rule #{rule_id}", LOG_PREFIX_LEDGER);
    Ok(rule_id)
}

/// Record that a rule fired and whether it led to a good outcome. Applies
/// the auto-suspend check (fire_count >= 10 and success_rate < 0.2).
#[instrument(skip(storage))]
pub async fn record_rule_fire(storage: &dyn StorageBackend, rule_id: i64, success: bool) -> Result<()> {
    let mut rule = storage
        .get_rule(rule_id)
        .await?
        .ok_or(crate::Error::NotFound(rule_id))?;
    rule.fire_count += 1;
    if success {
        rule.success_count += 1;
    } else {
        rule.fail_count += 1;
    }
    rule.last_fired = Some(chrono::Utc::now().to_rfc3339());
    rule.updated_at = rule.last_fired.clone().unwrap();
    if rule.should_auto_suspend() {
        rule.status = RuleStatus::Suspended;
        tracing::debug!("{} auto-suspended rule #{rule_id}", LOG_PREFIX_LEDGER);
    }
    storage.update_rule(&rule).await
}

/// `fire(id)`: plain relevance bump with no success/failure judgement yet.
#[instrument(skip(storage))]
pub async fn fire_rule(storage: &dyn StorageBackend, rule_id: i64) -> Result<()> {
    let mut rule = storage.get_rule(rule_id).await?.ok_or(Error::NotFound(rule_id))?;
    let now = chrono::Utc::now().to_rfc3339();
    rule.fire_count += 1;
    rule.last_fired = Some(now.clone());
    rule.updated_at = now;
    storage.update_rule(&rule).await
}

async fn transition(storage: &dyn StorageBackend, rule_id: i64, status: RuleStatus) -> Result<()> {
    let mut rule = storage.get_rule(rule_id).await?.ok_or(Error::NotFound(rule_id))?;
    rule.status = status;
    rule.updated_at = chrono::Utc::now().to_rfc3339();
    storage.update_rule(&rule).await
}

/// `suspend(id)`.
pub async fn suspend_rule(storage: &dyn StorageBackend, rule_id: i64) -> Result<()> {
    transition(storage, rule_id, RuleStatus::Suspended).await
}

/// `activate(id)`.
pub async fn activate_rule(storage: &dyn StorageBackend, rule_id: i64) -> Result<()> {
    transition(storage, rule_id, RuleStatus::Active).await
}

/// `retire(id)`.
pub async fn retire_rule(storage: &dyn StorageBackend, rule_id: i64) -> Result<()> {
    transition(storage, rule_id, RuleStatus::Retired).await
}

/// `add_manual(content, category, scope, priority, …)`: a hand-authored
/// rule with no originating insight.
#[instrument(skip(storage, content, context))]
#[allow(clippy::too_many_arguments)]
pub async fn add_manual_rule(
    storage: &dyn StorageBackend,
    session_id: &str,
    content: &str,
    context: &str,
    category: ErrorCategory,
    scope: RuleScope,
    priority: i32,
    project: Option<&str>,
    tags: Vec<String>,
) -> Result<i64> {
    let now = chrono::Utc::now().to_rfc3339();
    let rule = Rule {
        id: 0,
        session_id: session_id.to_string(),
        content: content.to_string(),
        context: context.to_string(),
        category,
        scope,
        priority: priority.clamp(1, 10),
        source_insight_id: None,
        project: project.map(str::to_string).unwrap_or_else(default_project),
        tags,
        status: RuleStatus::Active,
        fire_count: 0,
        success_count: 0,
        fail_count: 0,
        last_fired: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let id = storage.insert_rule(&rule).await?;
    tracing::debug!("{} added manual rule #{id}", LOG_PREFIX_LEDGER);
    Ok(id)
}

/// `list` action: rules filtered by project and/or scope, top 30 by
/// priority then success_rate.
pub async fn list_rules(
    storage: &dyn StorageBackend,
    project: Option<&str>,
    scope: Option<&RuleScope>,
) -> Result<Vec<Rule>> {
    let mut rules = storage.list_rules(None, usize::MAX).await?;
    if let Some(project) = project {
        rules.retain(|r| r.project == project);
    }
    if let Some(scope) = scope {
        rules.retain(|r| &r.scope == scope);
    }
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.success_rate().partial_cmp(&a.success_rate()).unwrap_or(std::cmp::Ordering::Equal))
    });
    rules.truncate(defaults::RULE_LIST_LIMIT);
    Ok(rules)
}

/// `get_rules_for_context(project, categories)`: active rules in scope
/// `{global, project:<p>, category:<c>…}`, top 20 by priority then
/// success_rate. Side effect: every returned rule's `fire_count` is
/// incremented and `last_fired` refreshed (relevance tracking).
#[instrument(skip(storage))]
pub async fn get_rules_for_context(
    storage: &dyn StorageBackend,
    project: &str,
    categories: &[ErrorCategory],
) -> Result<Vec<Rule>> {
    let mut by_id = std::collections::HashMap::new();
    for rule in storage.applicable_rules(project, None, Some(RuleStatus::Active)).await? {
        by_id.insert(rule.id, rule);
    }
    for &category in categories {
        for rule in storage.applicable_rules(project, Some(category), Some(RuleStatus::Active)).await? {
            by_id.insert(rule.id, rule);
        }
    }
    let mut rules: Vec<Rule> = by_id.into_values().collect();
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.success_rate().partial_cmp(&a.success_rate()).unwrap_or(std::cmp::Ordering::Equal))
    });
    rules.truncate(defaults::CONTEXT_RULE_LIMIT);

    let now = chrono::Utc::now().to_rfc3339();
    for rule in &mut rules {
        rule.fire_count += 1;
        rule.last_fired = Some(now.clone());
        rule.updated_at = now.clone();
        storage.update_rule(rule).await?;
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(fire: i64, success: i64) -> Rule {
        Rule {
            id: 1,
            session_id: "s".to_string(),
            content: "c".to_string(),
            context: String::new(),
            category: crate::types::ErrorCategory::Timeout,
            scope: RuleScope::Global,
            priority: 5,
            source_insight_id: None,
            project: default_project(),
            tags: vec![],
            status: RuleStatus::Active,
            fire_count: fire,
            success_count: success,
            fail_count: fire - success,
            last_fired: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn auto_suspend_requires_both_conditions() {
        assert!(rule(10, 1).should_auto_suspend());
        assert!(!rule(9, 0).should_auto_suspend());
        assert!(!rule(10, 5).should_auto_suspend());
    }
}
