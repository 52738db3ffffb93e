// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Access policies — data, not code.  A policy is a resource/action pattern
// plus a list of typed conditions evaluated by a small interpreter, so the
// policy set can be stored, audited, and replaced without redeploying the
// engine.
//
// The live set is an `Arc<Vec<Policy>>` swapped whole on every update:
// concurrent evaluations hold a snapshot and never observe a partially
// updated list.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::error::{Result, WardenError};

/// Whether a matching policy grants or refuses access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// The piece of request context a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    UserId,
    IpAddress,
    DeviceFingerprint,
    UserAgent,
    TrustScore,
    HourOfDay,
}

/// Comparison applied between the context value and the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    /// Wildcard pattern match (`*` matches any run of characters).
    Matches,
}

/// One typed condition of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: Value,
}

/// A single access policy.
///
/// Policies are evaluated in descending `priority` order; the first one
/// whose patterns and all conditions match decides the effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    /// Resource pattern, e.g. `"workflows/*"`.
    pub resource: String,
    /// Action pattern, e.g. `"read"` or `"*"`.
    pub action: String,
    pub conditions: Vec<Condition>,
    pub effect: PolicyEffect,
    pub priority: i32,
}

/// Context values a condition can be evaluated against, extracted from the
/// request by the engine.
#[derive(Debug, Clone)]
pub struct ConditionInput<'a> {
    pub user_id: Option<&'a str>,
    pub ip_address: String,
    pub device_fingerprint: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub trust_score: f64,
    pub hour_of_day: u32,
}

impl Condition {
    /// Evaluate this condition against the request context.
    ///
    /// Ill-typed comparisons (e.g. `GreaterThan` against a string) are a
    /// `PolicyEvaluationError`, which the engine treats as deny.
    pub fn evaluate(&self, input: &ConditionInput<'_>) -> Result<bool> {
        let actual: Value = match self.field {
            ConditionField::UserId => match input.user_id {
                Some(u) => Value::String(u.to_owned()),
                None => Value::Null,
            },
            ConditionField::IpAddress => Value::String(input.ip_address.clone()),
            ConditionField::DeviceFingerprint => match input.device_fingerprint {
                Some(f) => Value::String(f.to_owned()),
                None => Value::Null,
            },
            ConditionField::UserAgent => match input.user_agent {
                Some(a) => Value::String(a.to_owned()),
                None => Value::Null,
            },
            ConditionField::TrustScore => json_number(input.trust_score)?,
            ConditionField::HourOfDay => json_number(f64::from(input.hour_of_day))?,
        };

        match self.operator {
            ConditionOperator::Equals => Ok(actual == self.value),
            ConditionOperator::NotEquals => Ok(actual != self.value),
            ConditionOperator::GreaterThan => {
                Ok(as_number(&actual, self.field)? > as_number(&self.value, self.field)?)
            }
            ConditionOperator::LessThan => {
                Ok(as_number(&actual, self.field)? < as_number(&self.value, self.field)?)
            }
            ConditionOperator::Contains => {
                let haystack = as_string(&actual, self.field)?;
                let needle = as_string(&self.value, self.field)?;
                Ok(haystack.contains(needle))
            }
            ConditionOperator::Matches => {
                let text = as_string(&actual, self.field)?;
                let pattern = as_string(&self.value, self.field)?;
                Ok(wildcard_match(pattern, text))
            }
        }
    }
}

impl Policy {
    /// Whether this policy's patterns apply to the request, before
    /// conditions are considered.
    pub fn applies_to(&self, resource: &str, action: &str) -> bool {
        wildcard_match(&self.resource, resource) && wildcard_match(&self.action, action)
    }

    /// Whether every condition holds for the request.
    pub fn conditions_hold(&self, input: &ConditionInput<'_>) -> Result<bool> {
        for condition in &self.conditions {
            if !condition.evaluate(input)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn json_number(n: f64) -> Result<Value> {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| WardenError::PolicyEvaluationError(format!("non-finite number: {n}")))
}

fn as_number(value: &Value, field: ConditionField) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        WardenError::PolicyEvaluationError(format!(
            "expected a number for {field:?}, got {value}"
        ))
    })
}

fn as_string(value: &Value, field: ConditionField) -> Result<&str> {
    value.as_str().ok_or_else(|| {
        WardenError::PolicyEvaluationError(format!(
            "expected a string for {field:?}, got {value}"
        ))
    })
}

/// Match `text` against a pattern where `*` matches any run of characters.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }

    let mut pos = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(offset) => pos += offset + part.len(),
            None => return false,
        }
    }

    if last.is_empty() {
        return true;
    }
    text.len() >= pos + last.len() && text.ends_with(last)
}

// ---------------------------------------------------------------------------
// PolicySet
// ---------------------------------------------------------------------------

/// The engine's priority-ordered policy collection.
///
/// Updates clone the current list, modify the clone, sort it, and swap the
/// `Arc` — never a partial in-place edit visible mid-evaluation.
pub struct PolicySet {
    inner: RwLock<Arc<Vec<Policy>>>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// A consistent snapshot of the current policies, priority descending.
    pub fn snapshot(&self) -> Arc<Vec<Policy>> {
        Arc::clone(&self.inner.read().expect("policy set lock poisoned"))
    }

    /// Insert one policy (whole-collection replacement under the hood).
    pub fn add(&self, policy: Policy) {
        let mut guard = self.inner.write().expect("policy set lock poisoned");
        let mut next: Vec<Policy> = guard.as_ref().clone();
        next.push(policy);
        next.sort_by(|a, b| b.priority.cmp(&a.priority));
        *guard = Arc::new(next);
    }

    /// Replace the entire policy list.
    pub fn replace(&self, mut policies: Vec<Policy>) {
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut guard = self.inner.write().expect("policy set lock poisoned");
        *guard = Arc::new(policies);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("policy set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new()
    }
}
