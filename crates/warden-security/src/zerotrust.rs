// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zero-trust access evaluation — never trust, always verify.  Every request
// is scored across five contextual factors, checked against the policy set
// (deny by default), and logged to the audit trail.
//
// The engine is read-mostly: evaluations take a read lock on the behavioral
// state and a snapshot of the policy list; policy updates swap the whole
// list.  An evaluation that errors internally always resolves to a denial,
// never to an ambiguous or default-allow state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use warden_core::config::{SecurityConfig, TrustWeights};
use warden_core::error::{Result, WardenError};

use crate::audit::AuditLog;
use crate::policy::{ConditionInput, Policy, PolicyEffect, PolicySet, wildcard_match};

/// Two observations of the same user from different addresses inside this
/// window are treated as geographically implausible.
const IMPLAUSIBLE_ORIGIN_WINDOW_SECS: i64 = 60 * 60;

/// Failed attempts inside this window count against the identity factor.
const FAILURE_WINDOW_SECS: i64 = 15 * 60;

/// Failures within the window at or above this count are a high-risk signal.
const FAILURE_RISK_THRESHOLD: usize = 3;

/// Hours of history kept per user for the behavior factor.
const ACCESS_HISTORY_CAP: usize = 256;

/// Trend snapshots retained for continuous assessment.
const TREND_HISTORY_CAP: usize = 32;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Per-request context supplied by the caller. Ephemeral — nothing in here
/// is stored beyond the behavioral history the engine derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustContext {
    pub user_id: Option<String>,
    pub session_id: String,
    pub device_fingerprint: Option<String>,
    pub ip_address: IpAddr,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The five contextual factors, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustFactors {
    pub identity: f64,
    pub device: f64,
    pub location: f64,
    pub behavior: f64,
    pub network: f64,
}

/// A continuous confidence measure, computed fresh per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    pub overall: f64,
    pub factors: TrustFactors,
}

/// Concrete steps that would raise a denied request's score enough to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    MultiFactorVerification,
    DeviceRegistration,
    Reauthentication,
    NetworkChange,
}

/// Outcome of an access evaluation. Output-only; the engine has already
/// logged it to the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub trust_score: TrustScore,
    pub reason: String,
    pub required_actions: Vec<RequiredAction>,
}

/// Qualitative risk levels for the coarse assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One discrete risk signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub level: RiskLevel,
    pub description: String,
}

/// Coarse qualitative assessment used for alerting — not for the pass/fail
/// access decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_factors: Vec<RiskFactor>,
    pub overall_risk: RiskLevel,
    pub recommendations: Vec<String>,
}

/// Direction of the average session trust over recent reassessments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Aggregate view over the continuously monitored sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousAssessment {
    pub active_sessions: usize,
    pub average_trust: f64,
    pub trend: TrustTrend,
    pub policy_violations: u64,
}

/// Network-reputation data consumed by the network factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntel {
    /// Address prefixes considered malicious, e.g. `"203.0.113."`.
    pub malicious_prefixes: Vec<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl ThreatIntel {
    fn empty() -> Self {
        Self {
            malicious_prefixes: Vec::new(),
            refreshed_at: Utc::now(),
        }
    }

    fn is_malicious(&self, ip: IpAddr) -> bool {
        let ip = ip.to_string();
        self.malicious_prefixes.iter().any(|p| ip.starts_with(p))
    }
}

/// External threat-intelligence source. Refresh failures must never block
/// evaluation — the engine keeps serving with stale data.
pub trait ThreatFeed: Send + Sync {
    fn fetch(&self) -> Result<ThreatIntel>;
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct SessionRecord {
    context: TrustContext,
    score: f64,
    last_evaluated: DateTime<Utc>,
}

struct EngineState {
    /// user id -> registered device fingerprints.
    known_devices: HashMap<String, HashSet<String>>,
    /// user id -> (address, time) of the most recent allowed access.
    last_seen: HashMap<String, (IpAddr, DateTime<Utc>)>,
    /// user id -> hours-of-day of recent accesses.
    access_hours: HashMap<String, Vec<u32>>,
    /// user id -> timestamps of recent denials.
    recent_failures: HashMap<String, Vec<DateTime<Utc>>>,
    threat_intel: ThreatIntel,
    threat_intel_stale: bool,
    /// session id -> most recent evaluation.
    sessions: HashMap<String, SessionRecord>,
    /// Rolling averages captured by `reassess_sessions`.
    trend_history: VecDeque<f64>,
    policy_violations: u64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            known_devices: HashMap::new(),
            last_seen: HashMap::new(),
            access_hours: HashMap::new(),
            recent_failures: HashMap::new(),
            threat_intel: ThreatIntel::empty(),
            threat_intel_stale: false,
            sessions: HashMap::new(),
            trend_history: VecDeque::new(),
            policy_violations: 0,
        }
    }

    fn recent_failure_count(&self, user: &str, now: DateTime<Utc>) -> usize {
        self.recent_failures
            .get(user)
            .map(|times| {
                times
                    .iter()
                    .filter(|t| (now - **t).num_seconds() < FAILURE_WINDOW_SECS)
                    .count()
            })
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// ZeroTrustEngine
// ---------------------------------------------------------------------------

/// Contextual trust scoring plus policy evaluation, failing closed.
pub struct ZeroTrustEngine {
    policies: PolicySet,
    state: RwLock<EngineState>,
    audit: Arc<AuditLog>,
    feed: Option<Box<dyn ThreatFeed>>,
    weights: TrustWeights,
    default_threshold: f64,
    /// (pattern, threshold), consulted longest-pattern-first.
    resource_thresholds: Vec<(String, f64)>,
    monitoring_window_secs: i64,
}

impl ZeroTrustEngine {
    pub fn new(
        config: &SecurityConfig,
        audit: Arc<AuditLog>,
        feed: Option<Box<dyn ThreatFeed>>,
    ) -> Self {
        let mut resource_thresholds: Vec<(String, f64)> = config
            .resource_trust_thresholds
            .iter()
            .map(|(pattern, threshold)| (pattern.clone(), *threshold))
            .collect();
        // Longest pattern wins when several match.
        resource_thresholds.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            policies: PolicySet::new(),
            state: RwLock::new(EngineState::new()),
            audit,
            feed,
            weights: config.trust_weights.normalized(),
            default_threshold: config.default_trust_threshold,
            resource_thresholds,
            monitoring_window_secs: config.session_monitoring_window_secs as i64,
        }
    }

    // -- Policy administration ----------------------------------------------

    /// Insert a policy. The live list is replaced whole, so concurrent
    /// evaluations never see a partial update.
    pub fn add_policy(&self, policy: Policy) {
        info!(policy_id = %policy.id, priority = policy.priority, "policy added");
        self.policies.add(policy);
    }

    /// Replace the entire policy set.
    pub fn replace_policies(&self, policies: Vec<Policy>) {
        info!(count = policies.len(), "policy set replaced");
        self.policies.replace(policies);
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    // -- Scoring -------------------------------------------------------------

    /// Compute a fresh trust score for `context`.
    pub fn compute_trust_score(&self, context: &TrustContext) -> TrustScore {
        let state = self.state.read().expect("engine state lock poisoned");
        self.score_context(&state, context)
    }

    fn score_context(&self, state: &EngineState, ctx: &TrustContext) -> TrustScore {
        let identity = match &ctx.user_id {
            Some(user) => {
                let failures = state.recent_failure_count(user, ctx.timestamp);
                (0.9 - 0.15 * failures as f64).max(0.1)
            }
            None => 0.2,
        };

        let device = match (&ctx.device_fingerprint, &ctx.user_id) {
            (Some(fp), Some(user))
                if state
                    .known_devices
                    .get(user)
                    .is_some_and(|devices| devices.contains(fp)) =>
            {
                0.9
            }
            (Some(_), _) => 0.5,
            (None, _) => 0.3,
        };

        let location = match ctx.user_id.as_ref().and_then(|u| state.last_seen.get(u)) {
            Some((ip, _)) if *ip == ctx.ip_address => 0.9,
            Some((_, at)) => {
                let elapsed = (ctx.timestamp - *at).num_seconds();
                if elapsed < IMPLAUSIBLE_ORIGIN_WINDOW_SECS {
                    0.2
                } else {
                    0.7
                }
            }
            None => 0.6,
        };

        let behavior = match ctx.user_id.as_ref().and_then(|u| state.access_hours.get(u)) {
            Some(hours) if !hours.is_empty() => {
                let hour = ctx.timestamp.hour();
                let familiar = hours
                    .iter()
                    .any(|h| h.abs_diff(hour) <= 2 || h.abs_diff(hour) >= 22);
                if familiar { 0.9 } else { 0.4 }
            }
            _ => 0.5,
        };

        let network = if state.threat_intel.is_malicious(ctx.ip_address) {
            0.0
        } else if state.threat_intel_stale {
            0.8
        } else {
            0.9
        };

        let factors = TrustFactors {
            identity,
            device,
            location,
            behavior,
            network,
        };
        let overall = (self.weights.identity * identity
            + self.weights.device * device
            + self.weights.location * location
            + self.weights.behavior * behavior
            + self.weights.network * network)
            .clamp(0.0, 1.0);

        TrustScore { overall, factors }
    }

    fn threshold_for(&self, resource: &str) -> f64 {
        self.resource_thresholds
            .iter()
            .find(|(pattern, _)| wildcard_match(pattern, resource))
            .map(|(_, threshold)| *threshold)
            .unwrap_or(self.default_threshold)
    }

    // -- Evaluation ----------------------------------------------------------

    /// Evaluate an access request.
    ///
    /// Policies are consulted in descending priority; the first whose
    /// patterns and conditions all match decides the effect, and a request
    /// matching no policy is denied. The final grant additionally requires
    /// the trust score to clear the resource's threshold. Internal errors
    /// resolve to a denial. The decision is logged to the audit trail.
    #[instrument(skip_all, fields(resource = %resource, action = %action))]
    pub fn evaluate_access(
        &self,
        resource: &str,
        action: &str,
        context: &TrustContext,
    ) -> AccessDecision {
        let score = self.compute_trust_score(context);
        let threshold = self.threshold_for(resource);

        let input = ConditionInput {
            user_id: context.user_id.as_deref(),
            ip_address: context.ip_address.to_string(),
            device_fingerprint: context.device_fingerprint.as_deref(),
            user_agent: context.user_agent.as_deref(),
            trust_score: score.overall,
            hour_of_day: context.timestamp.hour(),
        };

        let mut matched: Option<(&Policy, PolicyEffect)> = None;
        let snapshot = self.policies.snapshot();
        for policy in snapshot.iter() {
            if !policy.applies_to(resource, action) {
                continue;
            }
            match policy.conditions_hold(&input) {
                Ok(true) => {
                    matched = Some((policy, policy.effect));
                    break;
                }
                Ok(false) => continue,
                Err(e) => {
                    // Fail closed: an evaluation error is a denial.
                    error!(policy_id = %policy.id, error = %e, "policy evaluation failed");
                    let decision = AccessDecision {
                        allowed: false,
                        trust_score: score,
                        reason: format!("policy evaluation failed: {e}"),
                        required_actions: self.required_actions(&score, threshold),
                    };
                    self.record_decision(resource, action, context, &decision);
                    return decision;
                }
            }
        }

        let (allowed, reason) = match matched {
            Some((policy, PolicyEffect::Deny)) => {
                (false, format!("denied by policy {}", policy.id))
            }
            Some((policy, PolicyEffect::Allow)) => {
                if score.overall >= threshold {
                    (true, format!("granted by policy {}", policy.id))
                } else {
                    (
                        false,
                        format!(
                            "trust score {:.2} below threshold {:.2}",
                            score.overall, threshold
                        ),
                    )
                }
            }
            None => (false, "no matching policy (deny by default)".to_owned()),
        };

        let decision = AccessDecision {
            allowed,
            trust_score: score,
            reason,
            required_actions: if allowed {
                Vec::new()
            } else {
                self.required_actions(&score, threshold)
            },
        };
        self.record_decision(resource, action, context, &decision);
        decision
    }

    fn required_actions(&self, score: &TrustScore, threshold: f64) -> Vec<RequiredAction> {
        let mut actions = Vec::new();
        if score.factors.identity < 0.5 {
            actions.push(RequiredAction::MultiFactorVerification);
        }
        if score.factors.device < 0.6 {
            actions.push(RequiredAction::DeviceRegistration);
        }
        if score.factors.network < 0.5 {
            actions.push(RequiredAction::NetworkChange);
        }
        if score.overall < threshold {
            actions.push(RequiredAction::Reauthentication);
        }
        actions
    }

    /// Fold the decision into the behavioral state and the audit trail.
    fn record_decision(
        &self,
        resource: &str,
        action: &str,
        context: &TrustContext,
        decision: &AccessDecision,
    ) {
        {
            let mut state = self.state.write().expect("engine state lock poisoned");

            if let Some(user) = &context.user_id {
                if decision.allowed {
                    state
                        .last_seen
                        .insert(user.clone(), (context.ip_address, context.timestamp));
                    let hours = state.access_hours.entry(user.clone()).or_default();
                    hours.push(context.timestamp.hour());
                    if hours.len() > ACCESS_HISTORY_CAP {
                        hours.remove(0);
                    }
                    if let Some(fp) = &context.device_fingerprint {
                        state
                            .known_devices
                            .entry(user.clone())
                            .or_default()
                            .insert(fp.clone());
                    }
                } else {
                    let failures = state.recent_failures.entry(user.clone()).or_default();
                    failures.push(context.timestamp);
                    failures.retain(|t| {
                        (context.timestamp - *t).num_seconds() < FAILURE_WINDOW_SECS
                    });
                }
            }
            if !decision.allowed {
                state.policy_violations += 1;
            }

            state.sessions.insert(
                context.session_id.clone(),
                SessionRecord {
                    context: context.clone(),
                    score: decision.trust_score.overall,
                    last_evaluated: Utc::now(),
                },
            );
        }

        let details = json!({
            "action": action,
            "reason": decision.reason,
            "trustScore": decision.trust_score.overall,
        });
        if let Err(e) = self.audit.log_authorization(
            context.user_id.as_deref(),
            resource,
            decision.allowed,
            Some(details),
        ) {
            error!(error = %e, "failed to audit access decision");
        }

        debug!(
            allowed = decision.allowed,
            score = decision.trust_score.overall,
            "access evaluated"
        );
    }

    // -- Risk assessment -----------------------------------------------------

    /// Coarse qualitative assessment driven by discrete signals, for
    /// alerting rather than the pass/fail decision.
    #[instrument(skip_all)]
    pub fn perform_risk_assessment(&self, context: &TrustContext) -> RiskAssessment {
        let state = self.state.read().expect("engine state lock poisoned");
        let mut factors = Vec::new();
        let mut recommendations = Vec::new();

        if state.threat_intel.is_malicious(context.ip_address) {
            factors.push(RiskFactor {
                name: "malicious_network".into(),
                level: RiskLevel::Critical,
                description: format!(
                    "request originates from a known-malicious network ({})",
                    context.ip_address
                ),
            });
            recommendations.push("block the source network and terminate the session".into());
        }

        if let Some(user) = &context.user_id {
            if let Some((ip, at)) = state.last_seen.get(user) {
                let elapsed = (context.timestamp - *at).num_seconds();
                if *ip != context.ip_address && elapsed < IMPLAUSIBLE_ORIGIN_WINDOW_SECS {
                    factors.push(RiskFactor {
                        name: "implausible_origin_change".into(),
                        level: RiskLevel::High,
                        description: format!(
                            "consecutive accesses from {ip} and {} within {elapsed}s",
                            context.ip_address
                        ),
                    });
                    recommendations.push("require re-authentication before continuing".into());
                }
            }

            let failures = state.recent_failure_count(user, context.timestamp);
            if failures >= FAILURE_RISK_THRESHOLD {
                factors.push(RiskFactor {
                    name: "repeated_failures".into(),
                    level: RiskLevel::High,
                    description: format!("{failures} denied attempts in the last 15 minutes"),
                });
                recommendations.push("lock the account pending verification".into());
            }

            let device_known = context.device_fingerprint.as_ref().is_some_and(|fp| {
                state
                    .known_devices
                    .get(user)
                    .is_some_and(|devices| devices.contains(fp))
            });
            if !device_known {
                factors.push(RiskFactor {
                    name: "unrecognized_device".into(),
                    level: RiskLevel::Low,
                    description: "device fingerprint has not been seen for this user".into(),
                });
                recommendations.push("prompt for device registration".into());
            }
        } else {
            factors.push(RiskFactor {
                name: "anonymous_principal".into(),
                level: RiskLevel::Medium,
                description: "request carries no authenticated identity".into(),
            });
            recommendations.push("require authentication".into());
        }

        let overall_risk = factors
            .iter()
            .map(|f| f.level)
            .max()
            .unwrap_or(RiskLevel::Low);

        RiskAssessment {
            risk_factors: factors,
            overall_risk,
            recommendations,
        }
    }

    // -- Threat intelligence -------------------------------------------------

    /// Refresh the network-reputation feed.
    ///
    /// On failure the previous data stays in use (marked stale) and the
    /// error is returned for the caller's retry schedule — evaluation is
    /// never blocked.
    #[instrument(skip_all)]
    pub fn update_threat_intelligence(&self) -> Result<()> {
        let Some(feed) = &self.feed else {
            return Err(WardenError::ThreatFeedUnavailable(
                "no threat feed configured".into(),
            ));
        };

        match feed.fetch() {
            Ok(intel) => {
                let mut state = self.state.write().expect("engine state lock poisoned");
                info!(
                    prefixes = intel.malicious_prefixes.len(),
                    "threat intelligence refreshed"
                );
                state.threat_intel = intel;
                state.threat_intel_stale = false;
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.write().expect("engine state lock poisoned");
                state.threat_intel_stale = true;
                warn!(error = %e, "threat feed refresh failed; continuing with stale data");
                Err(WardenError::ThreatFeedUnavailable(e.to_string()))
            }
        }
    }

    // -- Continuous monitoring -----------------------------------------------

    /// Register a device fingerprint as trusted for a user, e.g. after an
    /// out-of-band enrollment flow.
    pub fn register_device(&self, user_id: &str, fingerprint: &str) {
        let mut state = self.state.write().expect("engine state lock poisoned");
        state
            .known_devices
            .entry(user_id.to_owned())
            .or_default()
            .insert(fingerprint.to_owned());
        info!(user_id, "device registered");
    }

    /// Re-score every session still inside the monitoring window.
    ///
    /// Returns the number of active sessions. Intended to be driven on the
    /// caller's schedule.
    #[instrument(skip_all)]
    pub fn reassess_sessions(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().expect("engine state lock poisoned");

        let window = self.monitoring_window_secs;
        state
            .sessions
            .retain(|_, s| (now - s.last_evaluated).num_seconds() < window);

        let rescored: Vec<(String, f64)> = state
            .sessions
            .iter()
            .map(|(id, session)| {
                (id.clone(), self.score_context(&state, &session.context).overall)
            })
            .collect();

        let count = rescored.len();
        let average = if count > 0 {
            rescored.iter().map(|(_, s)| s).sum::<f64>() / count as f64
        } else {
            0.0
        };

        for (id, score) in rescored {
            if let Some(session) = state.sessions.get_mut(&id) {
                session.score = score;
            }
        }

        state.trend_history.push_back(average);
        if state.trend_history.len() > TREND_HISTORY_CAP {
            state.trend_history.pop_front();
        }

        debug!(sessions = count, average, "sessions reassessed");
        count
    }

    /// Aggregate trend over the monitored sessions.
    pub fn get_continuous_assessment_status(&self) -> ContinuousAssessment {
        let state = self.state.read().expect("engine state lock poisoned");

        let active_sessions = state.sessions.len();
        let average_trust = if active_sessions > 0 {
            state.sessions.values().map(|s| s.score).sum::<f64>() / active_sessions as f64
        } else {
            0.0
        };

        let trend = match (
            state.trend_history.len().checked_sub(2).map(|i| state.trend_history[i]),
            state.trend_history.back().copied(),
        ) {
            (Some(previous), Some(latest)) if latest - previous > 0.02 => TrustTrend::Increasing,
            (Some(previous), Some(latest)) if previous - latest > 0.02 => TrustTrend::Decreasing,
            _ => TrustTrend::Stable,
        };

        ContinuousAssessment {
            active_sessions,
            average_trust,
            trend,
            policy_violations: state.policy_violations,
        }
    }
}
