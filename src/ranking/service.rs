use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::distribution::{self, DistributionResult};
use super::domain::{
    Application, ApplicationId, Ranking, RankingId, ReorderError, StatusTransitionError,
};
use super::eligibility::{self, EligibilityError, SelectionMode};
use super::quota::{QuotaError, QuotaTable};
use super::roster::{Roster, RosterCycle, RosterError, RosterStatistics, RosterStatus};
use super::sheet::{self, RankRow, SheetError};
use super::store::{RankingRepository, RepositoryError};

/// Facade over the ranking repository, quota table, roster lifecycle, and
/// distribution engine. One instance serves the whole HTTP surface.
pub struct RankingService<R> {
    repository: Arc<R>,
    quotas: QuotaTable,
    in_flight: Mutex<BTreeSet<RankingId>>,
}

impl<R> RankingService<R>
where
    R: RankingRepository + 'static,
{
    pub fn new(repository: Arc<R>, quotas: QuotaTable) -> Self {
        Self {
            repository,
            quotas,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    /// Register a ranking list, validating every application's sub-type set
    /// against the configured quota table on the way in.
    pub fn create_ranking(&self, ranking: Ranking) -> Result<(), RankingServiceError> {
        let configured: BTreeSet<String> = self.quotas.sub_types().iter().cloned().collect();
        let mode = SelectionMode::Multiple(configured);
        for item in &ranking.items {
            let requested = &item.application.eligible_subtypes;
            let resolved = eligibility::resolve(requested, &mode)?;
            if let Some(code) = requested.difference(&resolved).next() {
                return Err(RankingServiceError::Eligibility(
                    EligibilityError::UnknownSubType { code: code.clone() },
                ));
            }
        }
        self.repository.insert(ranking)?;
        Ok(())
    }

    pub fn get(&self, id: RankingId) -> Result<Ranking, RankingServiceError> {
        Ok(self.repository.fetch(id)?)
    }

    /// Apply a manual reorder, e.g. from the drag-and-drop surface.
    ///
    /// Allocation flags are left untouched; only a distribution run may
    /// change them.
    pub fn reorder(
        &self,
        id: RankingId,
        new_order: &[ApplicationId],
    ) -> Result<Ranking, RankingServiceError> {
        let mut ranking = self.repository.fetch(id)?;
        ranking.apply_order(new_order)?;
        let updated = self.repository.update(ranking)?;
        info!(ranking = id.0, items = updated.items.len(), "ranking reordered");
        Ok(updated)
    }

    /// Import rank positions from a parsed sheet, all-or-nothing.
    pub fn import_ranks(
        &self,
        id: RankingId,
        rows: &[RankRow],
    ) -> Result<Ranking, RankingServiceError> {
        let mut ranking = self.repository.fetch(id)?;
        if ranking.is_finalized {
            return Err(RankingServiceError::Reorder(ReorderError::Finalized {
                ranking: id,
            }));
        }

        let by_student_id: BTreeMap<&str, ApplicationId> = ranking
            .items
            .iter()
            .map(|item| {
                (
                    item.application.student_id.as_str(),
                    item.application.id,
                )
            })
            .collect();

        let mut issues = Vec::new();
        let mut positions: Vec<(ApplicationId, u32)> = Vec::new();
        let mut seen_students: BTreeSet<&str> = BTreeSet::new();
        let mut seen_positions: BTreeSet<u32> = BTreeSet::new();

        for (index, row) in rows.iter().enumerate() {
            // Header is line 1 of the sheet.
            let line = index + 2;
            match by_student_id.get(row.student_id.as_str()) {
                Some(application_id) => {
                    if !seen_students.insert(row.student_id.as_str()) {
                        issues.push(ImportRowIssue {
                            row: line,
                            student_id: row.student_id.clone(),
                            detail: "student listed more than once".to_string(),
                        });
                        continue;
                    }
                    if row.rank_position == 0 {
                        issues.push(ImportRowIssue {
                            row: line,
                            student_id: row.student_id.clone(),
                            detail: "rank must be 1 or greater".to_string(),
                        });
                        continue;
                    }
                    if !seen_positions.insert(row.rank_position) {
                        issues.push(ImportRowIssue {
                            row: line,
                            student_id: row.student_id.clone(),
                            detail: format!("rank {} assigned more than once", row.rank_position),
                        });
                        continue;
                    }
                    positions.push((*application_id, row.rank_position));
                }
                None => issues.push(ImportRowIssue {
                    row: line,
                    student_id: row.student_id.clone(),
                    detail: "no matching application in this ranking".to_string(),
                }),
            }
        }

        let expected = ranking.items.len();
        if issues.is_empty() && positions.len() != expected {
            issues.push(ImportRowIssue {
                row: 0,
                student_id: String::new(),
                detail: format!(
                    "sheet covers {} of {expected} applications",
                    positions.len()
                ),
            });
        }
        if issues.is_empty() {
            if let Some(max) = seen_positions.iter().next_back() {
                if *max as usize != expected {
                    issues.push(ImportRowIssue {
                        row: 0,
                        student_id: String::new(),
                        detail: format!("ranks must run 1..{expected} without gaps, got max {max}"),
                    });
                }
            }
        }
        if !issues.is_empty() {
            return Err(RankingServiceError::ImportValidation { issues });
        }

        ranking.apply_positions(&positions)?;
        let updated = self.repository.update(ranking)?;
        info!(ranking = id.0, rows = rows.len(), "rank sheet imported");
        Ok(updated)
    }

    /// Import directly from CSV text, the form the HTTP surface receives.
    pub fn import_csv(&self, id: RankingId, body: &str) -> Result<Ranking, RankingServiceError> {
        let rows = sheet::parse_rank_rows(Cursor::new(body.as_bytes()))?;
        self.import_ranks(id, &rows)
    }

    pub fn export_csv(&self, id: RankingId) -> Result<String, RankingServiceError> {
        let ranking = self.repository.fetch(id)?;
        Ok(sheet::export_string(&ranking)?)
    }

    /// Run the distribution engine against the current ranking snapshot.
    ///
    /// The run is serialized per ranking, refuses rankings pinned by an
    /// active roster unless `force` is set, and commits `is_allocated`
    /// flags only after the whole result is computed.
    pub fn distribute(
        &self,
        id: RankingId,
        force: bool,
    ) -> Result<DistributionResult, RankingServiceError> {
        let _guard = self.begin_run(id)?;

        let ranking = self.repository.fetch(id)?;
        if !force {
            if let Some(roster) = &ranking.roster {
                if !roster.can_redistribute() {
                    return Err(RankingServiceError::DistributionLocked {
                        ranking: id,
                        roster_code: roster.roster_code.clone(),
                        status: roster.status,
                    });
                }
            }
        }

        let result = distribution::run(&ranking, &self.quotas)?;

        let admitted = result.admitted_ids();
        let mut updated = ranking;
        for item in &mut updated.items {
            item.is_allocated = admitted.contains(&item.application.id);
        }
        self.repository.update(updated)?;

        info!(
            ranking = id.0,
            admitted = result.admitted_total(),
            backup = result.backup_total(),
            rejected = result.rejected.len(),
            "distribution executed"
        );
        Ok(result)
    }

    pub fn finalize(&self, id: RankingId) -> Result<Ranking, RankingServiceError> {
        let mut ranking = self.repository.fetch(id)?;
        ranking.finalize()?;
        let updated = self.repository.update(ranking)?;
        info!(ranking = id.0, "ranking finalized");
        Ok(updated)
    }

    pub fn roster_status(&self, id: RankingId) -> Result<RosterStatusView, RankingServiceError> {
        let ranking = self.repository.fetch(id)?;
        Ok(match ranking.roster {
            Some(roster) => RosterStatusView {
                has_roster: true,
                can_redistribute: roster.can_redistribute(),
                roster_statistics: Some(roster.statistics()),
                roster_info: Some(roster),
            },
            None => RosterStatusView {
                has_roster: false,
                can_redistribute: true,
                roster_info: None,
                roster_statistics: None,
            },
        })
    }

    /// Attach a draft roster to a finalized ranking.
    pub fn start_roster(
        &self,
        id: RankingId,
        cycle: RosterCycle,
        period_label: &str,
    ) -> Result<Roster, RankingServiceError> {
        let mut ranking = self.repository.fetch(id)?;
        if !ranking.is_finalized {
            return Err(RankingServiceError::NotFinalized(id));
        }
        if ranking.roster.is_some() {
            return Err(RankingServiceError::RosterExists(id));
        }
        let code = format!(
            "R-{}-{}-{}",
            ranking.academic_year,
            ranking.sub_type_code,
            period_label
        );
        let roster = Roster::new(code, cycle, period_label, Utc::now());
        ranking.roster = Some(roster.clone());
        self.repository.update(ranking)?;
        info!(ranking = id.0, period = period_label, "roster drafted");
        Ok(roster)
    }

    /// Advance the roster through one generation job: draft -> processing ->
    /// completed. Idempotent per period label; a re-run against an already
    /// completed roster is a no-op.
    pub fn run_roster_job(&self, id: RankingId) -> Result<Roster, RankingServiceError> {
        self.with_roster(id, |roster| {
            if roster.status == RosterStatus::Completed {
                return Ok(());
            }
            if roster.status == RosterStatus::Failed {
                roster.retry(Utc::now())?;
            }
            let now = Utc::now();
            roster.begin_processing(now)?;
            roster.complete(now)?;
            Ok(())
        })
    }

    /// Operator path: mark an in-flight generation as failed so the ranking
    /// reopens for redistribution.
    pub fn fail_roster(&self, id: RankingId) -> Result<Roster, RankingServiceError> {
        self.with_roster(id, |roster| {
            if roster.status == RosterStatus::Draft {
                roster.begin_processing(Utc::now())?;
            }
            roster.fail(Utc::now())?;
            Ok(())
        })
    }

    pub fn lock_roster(&self, id: RankingId) -> Result<Roster, RankingServiceError> {
        self.with_roster(id, |roster| roster.lock(Utc::now()))
    }

    /// Administrative unlock: completed -> draft for the given period.
    pub fn unlock_roster(
        &self,
        id: RankingId,
        period_label: &str,
    ) -> Result<Roster, RankingServiceError> {
        self.with_roster(id, |roster| roster.unlock_to_draft(period_label, Utc::now()))
    }

    /// Soft-delete one application; it stops counting for allocation but
    /// keeps its row so the list can be restored.
    pub fn delete_application(
        &self,
        id: RankingId,
        application: ApplicationId,
    ) -> Result<Ranking, RankingServiceError> {
        self.with_application(id, application, Application::soft_delete)
    }

    pub fn restore_application(
        &self,
        id: RankingId,
        application: ApplicationId,
    ) -> Result<Ranking, RankingServiceError> {
        self.with_application(id, application, Application::restore)
    }

    fn with_roster(
        &self,
        id: RankingId,
        mutate: impl FnOnce(&mut Roster) -> Result<(), RosterError>,
    ) -> Result<Roster, RankingServiceError> {
        let mut ranking = self.repository.fetch(id)?;
        let roster = ranking
            .roster
            .as_mut()
            .ok_or(RankingServiceError::RosterMissing(id))?;
        mutate(roster)?;
        let snapshot = roster.clone();
        self.repository.update(ranking)?;
        Ok(snapshot)
    }

    fn with_application(
        &self,
        id: RankingId,
        application: ApplicationId,
        mutate: impl FnOnce(&mut Application) -> Result<(), StatusTransitionError>,
    ) -> Result<Ranking, RankingServiceError> {
        let mut ranking = self.repository.fetch(id)?;
        let item = ranking
            .item_mut(application)
            .ok_or(RankingServiceError::ApplicationNotFound {
                ranking: id,
                application,
            })?;
        mutate(&mut item.application)?;
        Ok(self.repository.update(ranking)?)
    }

    fn begin_run(&self, id: RankingId) -> Result<RunGuard<'_>, RankingServiceError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|err| RankingServiceError::Repository(RepositoryError::Unavailable(err.to_string())))?;
        if !in_flight.insert(id) {
            return Err(RankingServiceError::DistributionInProgress(id));
        }
        Ok(RunGuard {
            in_flight: &self.in_flight,
            id,
        })
    }
}

/// Releases the per-ranking run slot when the distribution call returns.
struct RunGuard<'a> {
    in_flight: &'a Mutex<BTreeSet<RankingId>>,
    id: RankingId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.id);
        }
    }
}

/// Roster state exposed to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct RosterStatusView {
    pub has_roster: bool,
    pub can_redistribute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster_info: Option<Roster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster_statistics: Option<RosterStatistics>,
}

/// One failed row of an import sheet. `row` 0 marks sheet-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRowIssue {
    pub row: usize,
    pub student_id: String,
    pub detail: String,
}

/// Error raised by the ranking service facade.
#[derive(Debug, thiserror::Error)]
pub enum RankingServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Status(#[from] StatusTransitionError),
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error("import rejected: {} row(s) failed validation", issues.len())]
    ImportValidation { issues: Vec<ImportRowIssue> },
    #[error("a distribution run is already in flight for ranking {}", .0 .0)]
    DistributionInProgress(RankingId),
    #[error(
        "ranking {} is pinned by roster '{roster_code}' in status '{}'",
        ranking.0,
        status.label()
    )]
    DistributionLocked {
        ranking: RankingId,
        roster_code: String,
        status: RosterStatus,
    },
    #[error("ranking {} has no roster", .0 .0)]
    RosterMissing(RankingId),
    #[error("ranking {} already has a roster", .0 .0)]
    RosterExists(RankingId),
    #[error("ranking {} must be finalized before roster generation", .0 .0)]
    NotFinalized(RankingId),
    #[error("application {} is not part of ranking {}", application.0, ranking.0)]
    ApplicationNotFound {
        ranking: RankingId,
        application: ApplicationId,
    },
}

impl RankingServiceError {
    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RankingServiceError::Repository(err) => err.code(),
            RankingServiceError::Reorder(err) => err.code(),
            RankingServiceError::Quota(err) => err.code(),
            RankingServiceError::Sheet(err) => err.code(),
            RankingServiceError::Roster(err) => err.code(),
            RankingServiceError::Status(_) => "INVALID_STATUS_TRANSITION",
            RankingServiceError::Eligibility(err) => err.code(),
            RankingServiceError::ImportValidation { .. } => "IMPORT_VALIDATION",
            RankingServiceError::DistributionInProgress(_) => "DISTRIBUTION_IN_PROGRESS",
            RankingServiceError::DistributionLocked { .. } => "DISTRIBUTION_LOCKED",
            RankingServiceError::RosterMissing(_) => "ROSTER_MISSING",
            RankingServiceError::RosterExists(_) => "ROSTER_EXISTS",
            RankingServiceError::NotFinalized(_) => "RANKING_NOT_FINALIZED",
            RankingServiceError::ApplicationNotFound { .. } => "APPLICATION_NOT_FOUND",
        }
    }
}
