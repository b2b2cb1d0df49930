use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one roster (造冊) generation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterStatus {
    Draft,
    Processing,
    Completed,
    Locked,
    Failed,
}

impl RosterStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RosterStatus::Draft => "draft",
            RosterStatus::Processing => "processing",
            RosterStatus::Completed => "completed",
            RosterStatus::Locked => "locked",
            RosterStatus::Failed => "failed",
        }
    }

    pub const fn label_zh(self) -> &'static str {
        match self {
            RosterStatus::Draft => "草稿",
            RosterStatus::Processing => "處理中",
            RosterStatus::Completed => "已完成",
            RosterStatus::Locked => "已鎖定",
            RosterStatus::Failed => "失敗",
        }
    }
}

/// How often a roster is cut for this ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterCycle {
    Monthly,
    SemiYearly,
    Yearly,
}

impl RosterCycle {
    pub const fn label(self) -> &'static str {
        match self {
            RosterCycle::Monthly => "monthly",
            RosterCycle::SemiYearly => "semi_yearly",
            RosterCycle::Yearly => "yearly",
        }
    }

    /// Periods expected over one academic year.
    pub const fn expected_total_periods(self) -> u32 {
        match self {
            RosterCycle::Monthly => 12,
            RosterCycle::SemiYearly => 2,
            RosterCycle::Yearly => 1,
        }
    }
}

/// Periodic finalization record derived from a completed distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub roster_code: String,
    pub status: RosterStatus,
    pub cycle: RosterCycle,
    pub period_label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Period labels that have completed, deduplicated so re-running a
    /// generation job never double-counts a period.
    completed_periods: BTreeSet<String>,
}

impl Roster {
    pub fn new(
        roster_code: impl Into<String>,
        cycle: RosterCycle,
        period_label: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            roster_code: roster_code.into(),
            status: RosterStatus::Draft,
            cycle,
            period_label: period_label.into(),
            created_at: now,
            updated_at: now,
            completed_periods: BTreeSet::new(),
        }
    }

    /// Whether the owning ranking may run the distribution engine again.
    ///
    /// Only a draft or failed roster leaves the ranking open; processing,
    /// completed, and locked rosters all pin the allocation they were cut
    /// from.
    pub const fn can_redistribute(&self) -> bool {
        matches!(self.status, RosterStatus::Draft | RosterStatus::Failed)
    }

    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<(), RosterError> {
        self.transition(RosterStatus::Processing, now)
    }

    /// Mark the current period complete. Idempotent per period label.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), RosterError> {
        self.transition(RosterStatus::Completed, now)?;
        self.completed_periods.insert(self.period_label.clone());
        Ok(())
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), RosterError> {
        self.transition(RosterStatus::Failed, now)
    }

    /// Permanently freeze the roster. No transition leaves `Locked`.
    pub fn lock(&mut self, now: DateTime<Utc>) -> Result<(), RosterError> {
        self.transition(RosterStatus::Locked, now)
    }

    /// Administrative correction path: reopen a completed roster as a draft
    /// for the next period.
    pub fn unlock_to_draft(
        &mut self,
        period_label: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RosterError> {
        self.transition(RosterStatus::Draft, now)?;
        self.period_label = period_label.into();
        Ok(())
    }

    /// Retry after a failed generation, keeping the same period.
    pub fn retry(&mut self, now: DateTime<Utc>) -> Result<(), RosterError> {
        if self.status != RosterStatus::Failed {
            return Err(RosterError::InvalidTransition {
                from: self.status,
                to: RosterStatus::Draft,
            });
        }
        self.status = RosterStatus::Draft;
        self.updated_at = now;
        Ok(())
    }

    pub fn statistics(&self) -> RosterStatistics {
        let expected = self.cycle.expected_total_periods();
        let completed = self.completed_periods.len() as u32;
        let completion_rate = if expected == 0 {
            0.0
        } else {
            (completed as f64 / expected as f64) * 100.0
        };
        RosterStatistics {
            roster_cycle: self.cycle,
            total_periods_completed: completed,
            expected_total_periods: expected,
            completion_rate,
        }
    }

    fn transition(&mut self, to: RosterStatus, now: DateTime<Utc>) -> Result<(), RosterError> {
        let allowed = matches!(
            (self.status, to),
            (RosterStatus::Draft, RosterStatus::Processing)
                | (RosterStatus::Processing, RosterStatus::Completed)
                | (RosterStatus::Processing, RosterStatus::Failed)
                | (RosterStatus::Completed, RosterStatus::Locked)
                | (RosterStatus::Completed, RosterStatus::Draft)
        );
        if !allowed {
            return Err(RosterError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

/// Progress metrics for cyclic rosters, display-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterStatistics {
    pub roster_cycle: RosterCycle,
    pub total_periods_completed: u32,
    pub expected_total_periods: u32,
    pub completion_rate: f64,
}

/// Raised on a disallowed roster state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("roster cannot move from '{}' to '{}'", from.label(), to.label())]
    InvalidTransition { from: RosterStatus, to: RosterStatus },
}

impl RosterError {
    pub const fn code(&self) -> &'static str {
        match self {
            RosterError::InvalidTransition { .. } => "ROSTER_INVALID_TRANSITION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-09-01T00:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn roster(cycle: RosterCycle) -> Roster {
        Roster::new("R-113-1", cycle, "2025-09", now())
    }

    #[test]
    fn happy_path_reaches_completed_then_locked() {
        let mut roster = roster(RosterCycle::Monthly);
        assert!(roster.can_redistribute());
        roster.begin_processing(now()).expect("draft -> processing");
        assert!(!roster.can_redistribute());
        roster.complete(now()).expect("processing -> completed");
        assert!(!roster.can_redistribute());
        roster.lock(now()).expect("completed -> locked");
        assert!(!roster.can_redistribute());
    }

    #[test]
    fn locked_is_terminal() {
        let mut roster = roster(RosterCycle::Yearly);
        roster.begin_processing(now()).expect("ok");
        roster.complete(now()).expect("ok");
        roster.lock(now()).expect("ok");
        assert!(roster.unlock_to_draft("2026-09", now()).is_err());
        assert!(roster.begin_processing(now()).is_err());
        assert!(roster.fail(now()).is_err());
    }

    #[test]
    fn failed_generation_reopens_redistribution() {
        let mut roster = roster(RosterCycle::Monthly);
        roster.begin_processing(now()).expect("ok");
        roster.fail(now()).expect("processing -> failed");
        assert!(roster.can_redistribute());
        roster.retry(now()).expect("failed -> draft");
        assert_eq!(roster.status, RosterStatus::Draft);
    }

    #[test]
    fn completing_same_period_twice_counts_once() {
        let mut roster = roster(RosterCycle::Monthly);
        roster.begin_processing(now()).expect("ok");
        roster.complete(now()).expect("ok");
        roster.unlock_to_draft("2025-09", now()).expect("reopen");
        roster.begin_processing(now()).expect("ok");
        roster.complete(now()).expect("ok");

        let stats = roster.statistics();
        assert_eq!(stats.total_periods_completed, 1);
        assert_eq!(stats.expected_total_periods, 12);
    }

    #[test]
    fn completion_rate_tracks_periods() {
        let mut roster = roster(RosterCycle::SemiYearly);
        roster.begin_processing(now()).expect("ok");
        roster.complete(now()).expect("ok");
        roster.unlock_to_draft("2026-02", now()).expect("reopen");
        roster.begin_processing(now()).expect("ok");
        roster.complete(now()).expect("ok");

        let stats = roster.statistics();
        assert_eq!(stats.total_periods_completed, 2);
        assert!((stats.completion_rate - 100.0).abs() < f64::EPSILON);
    }
}
