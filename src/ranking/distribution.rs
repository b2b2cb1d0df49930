use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, Ranking, RankingId, RankingItem};
use super::quota::{QuotaError, QuotaTable};

/// Why an application ended up outside every admitted and backup list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    QuotaExceeded,
    NotEligible,
}

impl RejectionReason {
    pub const fn label(self) -> &'static str {
        match self {
            RejectionReason::QuotaExceeded => "quota exceeded",
            RejectionReason::NotEligible => "not eligible for any sub-type",
        }
    }

    pub const fn label_zh(self) -> &'static str {
        match self {
            RejectionReason::QuotaExceeded => "名額已滿",
            RejectionReason::NotEligible => "不符合任何子類別資格",
        }
    }
}

/// One admitted seat inside a (sub-type, college) cell, in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmittedEntry {
    pub rank_position: u32,
    pub application_id: ApplicationId,
    pub student_id: String,
    pub student_name: String,
    pub college: String,
}

/// One waitlist slot below the quota cutoff, in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub backup_position: u32,
    pub rank_position: u32,
    pub application_id: ApplicationId,
    pub student_id: String,
    pub student_name: String,
    pub college: String,
}

/// Application left out of every cell, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub rank_position: u32,
    pub application_id: ApplicationId,
    pub student_id: String,
    pub student_name: String,
    pub reason: RejectionReason,
}

/// Allocation outcome for one (sub-type, college) cell.
///
/// `demand` counts eligible active applicants for the cell regardless of
/// where they were finally placed, so zero-quota cells still report interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAllocation {
    pub sub_type: String,
    pub college: String,
    pub quota: u32,
    pub demand: u32,
    pub admitted: Vec<AdmittedEntry>,
    pub backup: Vec<BackupEntry>,
}

/// Full output of one distribution engine run. Pure computation artifact;
/// re-running against unchanged inputs yields an identical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionResult {
    pub ranking_id: RankingId,
    pub cells: Vec<CellAllocation>,
    pub rejected: Vec<RejectedEntry>,
}

impl DistributionResult {
    /// Applications that won a seat anywhere, the only ones whose
    /// `is_allocated` flag may be set.
    pub fn admitted_ids(&self) -> BTreeSet<ApplicationId> {
        self.cells
            .iter()
            .flat_map(|cell| cell.admitted.iter().map(|entry| entry.application_id))
            .collect()
    }

    pub fn admitted_total(&self) -> usize {
        self.cells.iter().map(|cell| cell.admitted.len()).sum()
    }

    pub fn backup_total(&self) -> usize {
        self.cells.iter().map(|cell| cell.backup.len()).sum()
    }
}

/// Run the allocation over a ranking snapshot.
///
/// Sub-types are processed in quota registration order; within a pass the
/// items are walked best rank first. An application admitted anywhere, or
/// already holding a backup slot, is consumed and skipped by later passes so
/// it can never appear in two lists. Raw position against `total_quota` is
/// deliberately ignored; only per-cell quotas decide admission.
pub fn run(ranking: &Ranking, quotas: &QuotaTable) -> Result<DistributionResult, QuotaError> {
    let mut items: Vec<&RankingItem> = ranking.items.iter().collect();
    // Stable sort: equal positions fall back to insertion order.
    items.sort_by_key(|item| item.rank_position);

    // Every sub-type an active applicant is eligible for must be configured,
    // even ones the passes below would never reach.
    for item in &items {
        let application = &item.application;
        if !application.status.counts_for_allocation() {
            continue;
        }
        for sub_type in &application.eligible_subtypes {
            quotas.total_quota(sub_type)?;
        }
    }

    let mut consumed: BTreeSet<ApplicationId> = BTreeSet::new();
    let mut cells: Vec<CellAllocation> = Vec::new();

    for sub_type in quotas.sub_types() {
        let mut pass_cells: Vec<CellAllocation> = quotas
            .colleges(sub_type)
            .map(|(college, quota)| CellAllocation {
                sub_type: sub_type.clone(),
                college: college.to_string(),
                quota,
                demand: 0,
                admitted: Vec::new(),
                backup: Vec::new(),
            })
            .collect();

        for item in &items {
            let application = &item.application;
            if !application.status.counts_for_allocation() {
                continue;
            }
            if !application.eligible_subtypes.contains(sub_type) {
                continue;
            }

            quotas.get(sub_type, &application.academy_code)?;
            let Some(cell) = pass_cells
                .iter_mut()
                .find(|cell| cell.college == application.academy_code)
            else {
                continue;
            };
            cell.demand += 1;

            if consumed.contains(&application.id) {
                continue;
            }

            if (cell.admitted.len() as u32) < cell.quota {
                cell.admitted.push(AdmittedEntry {
                    rank_position: item.rank_position,
                    application_id: application.id,
                    student_id: application.student_id.clone(),
                    student_name: application.student_name.clone(),
                    college: application.academy_code.clone(),
                });
                consumed.insert(application.id);
            } else {
                let backup_position = cell.backup.len() as u32 + 1;
                cell.backup.push(BackupEntry {
                    backup_position,
                    rank_position: item.rank_position,
                    application_id: application.id,
                    student_id: application.student_id.clone(),
                    student_name: application.student_name.clone(),
                    college: application.academy_code.clone(),
                });
                consumed.insert(application.id);
            }
        }

        cells.extend(pass_cells);
    }

    let mut rejected = Vec::new();
    for item in &items {
        let application = &item.application;
        if !application.status.counts_for_allocation() {
            continue;
        }
        let reason = if application.eligible_subtypes.is_empty() {
            RejectionReason::NotEligible
        } else if !consumed.contains(&application.id) {
            RejectionReason::QuotaExceeded
        } else {
            continue;
        };
        rejected.push(RejectedEntry {
            rank_position: item.rank_position,
            application_id: application.id,
            student_id: application.student_id.clone(),
            student_name: application.student_name.clone(),
            reason,
        });
    }

    Ok(DistributionResult {
        ranking_id: ranking.id,
        cells,
        rejected,
    })
}
