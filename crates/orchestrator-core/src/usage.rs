//! Usage Accounting: per-tenant action quotas and the action ledger.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Free,
    Pro,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLimits {
    pub tenant_id: Uuid,
    pub plan_kind: PlanKind,
    pub monthly_action_limit: i64,
    pub unlimited: bool,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub actions_used_this_period: i64,
    pub overage_actions_this_period: i64,
    pub overage_allowed: bool,
    pub overage_price_per_action: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub is_overage: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    pub tenant_id: Uuid,
    pub execution_id: Uuid,
    pub job_record_id: Uuid,
    pub action_kind: String,
    pub count: i64,
    pub is_overage: bool,
    pub estimated_cost: f64,
    pub logged_at: DateTime<Utc>,
}

/// `CheckUsageAllowed(tenantId)`. Pure function over the loaded
/// `UsageLimits` row; the caller is responsible for loading it (and, on the
/// hot admission path, holding the tenant's row-level lock while it does).
pub fn check_usage_allowed(limits: &UsageLimits) -> AdmissionDecision {
    if limits.unlimited {
        return AdmissionDecision {
            allowed: true,
            is_overage: false,
            reason: None,
        };
    }
    if limits.actions_used_this_period < limits.monthly_action_limit {
        return AdmissionDecision {
            allowed: true,
            is_overage: false,
            reason: None,
        };
    }
    if limits.overage_allowed {
        return AdmissionDecision {
            allowed: true,
            is_overage: true,
            reason: None,
        };
    }
    AdmissionDecision {
        allowed: false,
        is_overage: false,
        reason: Some(format!(
            "tenant {} is at its monthly action cap and overage is not allowed; resets {}",
            limits.tenant_id, limits.period_end
        )),
    }
}

/// Whether the *next* recorded action lands in-quota or as overage, judged
/// from the counters immediately before the increment.
pub fn is_next_action_overage(limits: &UsageLimits) -> bool {
    if limits.unlimited {
        return false;
    }
    limits.actions_used_this_period >= limits.monthly_action_limit
}

pub fn estimated_cost(limits: &UsageLimits, is_overage: bool) -> f64 {
    if is_overage {
        limits.overage_price_per_action
    } else {
        0.0
    }
}

/// Free-plan period advance: reset counters to zero and roll the window
/// forward by 30 days. Pro-plan periods are advanced by the billing
/// provider's invoice signal, not this function — callers only apply it to
/// free-plan rows whose `period_end <= now`.
pub fn advance_free_plan_period(limits: &mut UsageLimits, now: DateTime<Utc>) {
    limits.actions_used_this_period = 0;
    limits.overage_actions_this_period = 0;
    limits.period_start = now;
    limits.period_end = now + Duration::days(30);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(used: i64, cap: i64, overage_allowed: bool) -> UsageLimits {
        UsageLimits {
            tenant_id: Uuid::new_v4(),
            plan_kind: PlanKind::Free,
            monthly_action_limit: cap,
            unlimited: false,
            period_start: Utc::now(),
            period_end: Utc::now() + Duration::days(30),
            actions_used_this_period: used,
            overage_actions_this_period: 0,
            overage_allowed,
            overage_price_per_action: 0.05,
        }
    }

    #[test]
    fn admits_under_cap() {
        let decision = check_usage_allowed(&limits(1999, 2000, false));
        assert_eq!(decision.allowed, true);
        assert_eq!(decision.is_overage, false);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn rejects_at_cap_without_overage() {
        let l = limits(2000, 2000, false);
        let decision = check_usage_allowed(&l);
        assert_eq!(decision.allowed, false);
        assert_eq!(decision.is_overage, false);
        let reason = decision.reason.expect("rejection must carry a reason");
        assert!(reason.contains(&l.tenant_id.to_string()));
        assert!(reason.contains(&l.period_end.to_string()), "reason must include the reset date: {reason}");
    }

    #[test]
    fn admits_as_overage_at_cap_when_allowed() {
        let decision = check_usage_allowed(&limits(2000, 2000, true));
        assert_eq!(decision.allowed, true);
        assert_eq!(decision.is_overage, true);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn unlimited_plan_always_admits() {
        let mut l = limits(999_999, 2000, false);
        l.unlimited = true;
        let decision = check_usage_allowed(&l);
        assert_eq!(decision.allowed, true);
        assert_eq!(decision.is_overage, false);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn boundary_exactly_at_cap_minus_one_still_in_quota() {
        // A free tenant at monthlyActionLimit - 1 can admit one more
        // execution before tipping into overage/rejection.
        assert!(!is_next_action_overage(&limits(1999, 2000, false)));
        assert!(is_next_action_overage(&limits(2000, 2000, false)));
    }

    #[test]
    fn period_advance_resets_counters_and_rolls_window() {
        let mut l = limits(2000, 2000, false);
        let now = Utc::now();
        advance_free_plan_period(&mut l, now);
        assert_eq!(l.actions_used_this_period, 0);
        assert_eq!(l.overage_actions_this_period, 0);
        assert_eq!(l.period_start, now);
        assert_eq!(l.period_end, now + Duration::days(30));
    }
}
