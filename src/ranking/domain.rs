use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Identifier wrapper for submitted scholarship applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub u64);

/// Identifier wrapper for ranking lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RankingId(pub u64);

/// Semester within an academic year, numbered the way the registrar does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semester {
    First,
    Second,
}

impl Semester {
    pub const fn label(self) -> &'static str {
        match self {
            Semester::First => "first",
            Semester::Second => "second",
        }
    }

    pub const fn label_zh(self) -> &'static str {
        match self {
            Semester::First => "第一學期",
            Semester::Second => "第二學期",
        }
    }
}

/// Lifecycle status of an application as driven by the review surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    Rejected,
    Withdrawn,
    Deleted,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
            ApplicationStatus::Deleted => "deleted",
        }
    }

    pub const fn label_zh(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "草稿",
            ApplicationStatus::Submitted => "已送出",
            ApplicationStatus::Rejected => "已駁回",
            ApplicationStatus::Withdrawn => "已撤回",
            ApplicationStatus::Deleted => "已刪除",
        }
    }

    /// Only submitted applications take part in allocation passes.
    pub const fn counts_for_allocation(self) -> bool {
        matches!(self, ApplicationStatus::Submitted)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "draft" => Some(ApplicationStatus::Draft),
            "submitted" => Some(ApplicationStatus::Submitted),
            "rejected" => Some(ApplicationStatus::Rejected),
            "withdrawn" => Some(ApplicationStatus::Withdrawn),
            "deleted" => Some(ApplicationStatus::Deleted),
            _ => None,
        }
    }
}

/// Review progress tracked separately from the submission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Recommended,
    Approved,
    Returned,
}

impl ReviewStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Recommended => "recommended",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Returned => "returned",
        }
    }
}

/// A student's submission for one scholarship, with resolved sub-type eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub app_id: String,
    pub student_name: String,
    pub student_id: String,
    pub academy_code: String,
    pub academy_name: String,
    pub department_code: String,
    pub department_name: String,
    pub scholarship_type: String,
    pub eligible_subtypes: BTreeSet<String>,
    pub status: ApplicationStatus,
    pub review_status: ReviewStatus,
}

impl Application {
    /// Soft delete keeps the row restorable; only draft-like states may be deleted.
    pub fn soft_delete(&mut self) -> Result<(), StatusTransitionError> {
        match self.status {
            ApplicationStatus::Deleted => Err(StatusTransitionError {
                from: self.status,
                action: "delete",
            }),
            _ => {
                self.status = ApplicationStatus::Deleted;
                Ok(())
            }
        }
    }

    /// Restore a soft-deleted application back to draft.
    pub fn restore(&mut self) -> Result<(), StatusTransitionError> {
        match self.status {
            ApplicationStatus::Deleted => {
                self.status = ApplicationStatus::Draft;
                Ok(())
            }
            _ => Err(StatusTransitionError {
                from: self.status,
                action: "restore",
            }),
        }
    }
}

/// Raised when a lifecycle action does not apply to the current status.
#[derive(Debug, thiserror::Error)]
#[error("cannot {action} application in status '{}'", from.label())]
pub struct StatusTransitionError {
    pub from: ApplicationStatus,
    pub action: &'static str,
}

/// One row binding an application to a position within a ranking list.
///
/// `is_allocated` belongs to the distribution engine alone; reordering and
/// imports must leave it untouched so stale UI state can never masquerade as
/// an allocation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingItem {
    pub application: Application,
    pub rank_position: u32,
    pub is_allocated: bool,
    pub sub_type: String,
}

/// Ordered ranking list for one (scholarship sub-type, academic year, semester).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub id: RankingId,
    pub sub_type_code: String,
    pub academic_year: u16,
    pub semester: Semester,
    pub total_quota: u32,
    pub is_finalized: bool,
    /// Optimistic concurrency token, bumped on every committed mutation.
    pub version: u64,
    pub items: Vec<RankingItem>,
    pub roster: Option<crate::ranking::roster::Roster>,
}

impl Ranking {
    pub fn new(
        id: RankingId,
        sub_type_code: impl Into<String>,
        academic_year: u16,
        semester: Semester,
        total_quota: u32,
    ) -> Self {
        Self {
            id,
            sub_type_code: sub_type_code.into(),
            academic_year,
            semester,
            total_quota,
            is_finalized: false,
            version: 0,
            items: Vec::new(),
            roster: None,
        }
    }

    /// Append an application at the end of the list, keeping positions dense.
    pub fn push_application(&mut self, application: Application) {
        let sub_type = self.sub_type_code.clone();
        let rank_position = self.items.len() as u32 + 1;
        self.items.push(RankingItem {
            application,
            rank_position,
            is_allocated: false,
            sub_type,
        });
    }

    pub fn item(&self, id: ApplicationId) -> Option<&RankingItem> {
        self.items.iter().find(|item| item.application.id == id)
    }

    pub fn item_mut(&mut self, id: ApplicationId) -> Option<&mut RankingItem> {
        self.items.iter_mut().find(|item| item.application.id == id)
    }

    /// True when the stored positions are exactly the permutation 1..=N.
    pub fn positions_dense(&self) -> bool {
        let mut positions: Vec<u32> = self.items.iter().map(|item| item.rank_position).collect();
        positions.sort_unstable();
        positions
            .iter()
            .enumerate()
            .all(|(index, position)| *position == index as u32 + 1)
    }

    /// Reorder the list to match `new_order`, recomputing dense positions.
    ///
    /// Every stored application must appear exactly once in `new_order`.
    /// Allocation flags are preserved as-is.
    pub fn apply_order(&mut self, new_order: &[ApplicationId]) -> Result<(), ReorderError> {
        if self.is_finalized {
            return Err(ReorderError::Finalized { ranking: self.id });
        }

        let mut remaining: BTreeSet<ApplicationId> =
            self.items.iter().map(|item| item.application.id).collect();
        for id in new_order {
            if !remaining.remove(id) {
                if self.item(*id).is_some() {
                    return Err(ReorderError::DuplicateApplication { application: *id });
                }
                return Err(ReorderError::UnknownApplication { application: *id });
            }
        }
        if let Some(missing) = remaining.into_iter().next() {
            return Err(ReorderError::MissingApplication {
                application: missing,
            });
        }

        let mut by_id: BTreeMap<ApplicationId, RankingItem> = self
            .items
            .drain(..)
            .map(|item| (item.application.id, item))
            .collect();
        let mut reordered = Vec::with_capacity(by_id.len());
        for (index, id) in new_order.iter().enumerate() {
            if let Some(mut item) = by_id.remove(id) {
                item.rank_position = index as u32 + 1;
                reordered.push(item);
            }
        }
        self.items = reordered;
        Ok(())
    }

    /// Assign explicit positions, used by the spreadsheet import path.
    ///
    /// The positions must already have been validated as a dense permutation.
    pub fn apply_positions(
        &mut self,
        positions: &[(ApplicationId, u32)],
    ) -> Result<(), ReorderError> {
        let mut order: Vec<(u32, ApplicationId)> = positions
            .iter()
            .map(|(id, position)| (*position, *id))
            .collect();
        order.sort_by_key(|(position, _)| *position);
        let ids: Vec<ApplicationId> = order.into_iter().map(|(_, id)| id).collect();
        self.apply_order(&ids)
    }

    pub fn finalize(&mut self) -> Result<(), ReorderError> {
        if self.is_finalized {
            return Err(ReorderError::Finalized { ranking: self.id });
        }
        self.is_finalized = true;
        Ok(())
    }
}

/// Raised when a reorder or import cannot be applied to the ranking.
#[derive(Debug, thiserror::Error)]
pub enum ReorderError {
    #[error("ranking {} is finalized and can no longer be reordered", ranking.0)]
    Finalized { ranking: RankingId },
    #[error("application {} is not part of this ranking", application.0)]
    UnknownApplication { application: ApplicationId },
    #[error("application {} appears more than once in the new order", application.0)]
    DuplicateApplication { application: ApplicationId },
    #[error("application {} is missing from the new order", application.0)]
    MissingApplication { application: ApplicationId },
}

impl ReorderError {
    /// Stable machine-readable code surfaced alongside the message.
    pub const fn code(&self) -> &'static str {
        match self {
            ReorderError::Finalized { .. } => "RANKING_FINALIZED",
            ReorderError::UnknownApplication { .. } => "UNKNOWN_APPLICATION",
            ReorderError::DuplicateApplication { .. } => "DUPLICATE_APPLICATION",
            ReorderError::MissingApplication { .. } => "MISSING_APPLICATION",
        }
    }
}
