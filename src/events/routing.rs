//! Routing Rules
//!
//! Rules forward matching events to named targets. Every matching rule fires;
//! rules are evaluated by descending priority, ties in registration order.

use super::error::EventError;
use super::filter::EventFilter;
use crate::types::BudgetEvent;

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub id: String,
    pub name: String,
    pub filter: EventFilter,
    /// Downstream sink names
    pub targets: Vec<String>,
    /// Higher is evaluated first
    pub priority: i32,
    pub active: bool,
}

impl RoutingRule {
    pub fn new<S: Into<String>>(
        id: impl Into<String>,
        filter: EventFilter,
        targets: impl IntoIterator<Item = S>,
        priority: i32,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            filter,
            targets: targets.into_iter().map(Into::into).collect(),
            priority,
            active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Rules kept sorted by evaluation order
#[derive(Debug, Default)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn add(&mut self, rule: RoutingRule) -> Result<(), EventError> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(EventError::DuplicateRule(rule.id));
        }
        if rule.targets.is_empty() {
            return Err(EventError::InvalidFilter(format!("routing rule '{}' has no targets", rule.id)));
        }
        rule.filter.validate()?;

        // After every rule with priority >= the new one keeps ties in registration order
        let position = self.rules.partition_point(|r| r.priority >= rule.priority);
        self.rules.insert(position, rule);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<RoutingRule, EventError> {
        let index = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| EventError::UnknownRule(id.to_string()))?;
        Ok(self.rules.remove(index))
    }

    /// Targets for `event` in fan-out order
    pub fn targets_for(&self, event: &BudgetEvent) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.active && rule.filter.matches(event))
            .flat_map(|rule| rule.targets.iter().cloned())
            .collect()
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.active).count()
    }
}
