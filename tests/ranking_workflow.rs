//! End-to-end scenarios for the ranking service facade: reorder, import,
//! distribution, finalization, and roster locking, driven the way the portal
//! backend drives them.

mod common {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use scholarship_ranking::ranking::{
        Application, ApplicationId, ApplicationStatus, InMemoryRankingRepository, QuotaTable,
        Ranking, RankingId, RankingService, ReviewStatus, Semester,
    };

    pub(super) fn application(id: u64, college: &str, subtypes: &[&str]) -> Application {
        Application {
            id: ApplicationId(id),
            app_id: format!("APP-{id:04}"),
            student_name: format!("Student {id}"),
            student_id: format!("B{id:07}"),
            academy_code: college.to_string(),
            academy_name: format!("College {college}"),
            department_code: "CS".to_string(),
            department_name: "Computer Science".to_string(),
            scholarship_type: "merit".to_string(),
            eligible_subtypes: subtypes.iter().map(|code| code.to_string()).collect::<BTreeSet<_>>(),
            status: ApplicationStatus::Submitted,
            review_status: ReviewStatus::Recommended,
        }
    }

    pub(super) fn quotas() -> QuotaTable {
        let mut quotas = QuotaTable::new();
        quotas.set("general", "ENG", 2);
        quotas
    }

    /// Ranking 1 with three ENG applications eligible for `general`.
    pub(super) fn service_with_three() -> Arc<RankingService<InMemoryRankingRepository>> {
        let repository = Arc::new(InMemoryRankingRepository::new());
        let service = Arc::new(RankingService::new(repository, quotas()));

        let mut ranking = Ranking::new(RankingId(1), "general", 113, Semester::First, 2);
        for id in [1, 2, 3] {
            ranking.push_application(application(id, "ENG", &["general"]));
        }
        service.create_ranking(ranking).expect("seed ranking");
        service
    }
}

use scholarship_ranking::ranking::{
    ApplicationId, RankingId, RankingServiceError, RejectionReason, RepositoryError, RosterCycle,
};

#[test]
fn distribution_partitions_admitted_backup_rejected() {
    let service = common::service_with_three();

    let result = service.distribute(RankingId(1), false).expect("runs");
    let cell = &result.cells[0];

    let admitted: Vec<u64> = cell.admitted.iter().map(|e| e.application_id.0).collect();
    assert_eq!(admitted, vec![1, 2]);
    assert_eq!(cell.backup.len(), 1);
    assert_eq!(cell.backup[0].backup_position, 1);
    assert_eq!(cell.backup[0].application_id.0, 3);
    assert!(result.rejected.is_empty());

    // The engine owns is_allocated; the stored ranking now reflects the run.
    let ranking = service.get(RankingId(1)).expect("fetch");
    assert!(ranking.item(ApplicationId(1)).expect("item").is_allocated);
    assert!(ranking.item(ApplicationId(2)).expect("item").is_allocated);
    assert!(!ranking.item(ApplicationId(3)).expect("item").is_allocated);
}

#[test]
fn reorder_then_redistribute_moves_the_cutoff() {
    let service = common::service_with_three();

    service
        .reorder(
            RankingId(1),
            &[ApplicationId(3), ApplicationId(1), ApplicationId(2)],
        )
        .expect("reorders");

    // Reordering alone must not flip any allocation flag.
    let ranking = service.get(RankingId(1)).expect("fetch");
    assert!(ranking.items.iter().all(|item| !item.is_allocated));

    let result = service.distribute(RankingId(1), false).expect("runs");
    let cell = &result.cells[0];
    let admitted: Vec<u64> = cell.admitted.iter().map(|e| e.application_id.0).collect();
    assert_eq!(admitted, vec![3, 1]);
    assert_eq!(cell.backup[0].application_id.0, 2);
}

#[test]
fn ineligible_application_is_always_rejected() {
    use std::sync::Arc;

    use scholarship_ranking::ranking::{
        InMemoryRankingRepository, Ranking, RankingService, Semester,
    };

    let repository = Arc::new(InMemoryRankingRepository::new());
    let service = RankingService::new(repository, common::quotas());

    let mut ranking = Ranking::new(RankingId(7), "general", 113, Semester::First, 2);
    ranking.push_application(common::application(1, "ENG", &["general"]));
    ranking.push_application(common::application(2, "ENG", &["general"]));
    ranking.push_application(common::application(3, "ENG", &[]));
    service.create_ranking(ranking).expect("seed");

    let result = service.distribute(RankingId(7), false).expect("runs");
    assert_eq!(result.cells[0].admitted.len(), 2);
    assert!(result.cells[0].backup.is_empty());
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].reason, RejectionReason::NotEligible);
}

#[test]
fn import_applies_atomically_and_round_trips_with_export() {
    let service = common::service_with_three();

    let exported = service.export_csv(RankingId(1)).expect("exports");
    assert!(exported.starts_with("Rank,Student ID,Name,College,Department"));

    // Reverse the order via the sheet.
    let sheet = "Student ID,Name,Rank\nB0000001,Student 1,3\nB0000002,Student 2,2\nB0000003,Student 3,1\n";
    let ranking = service.import_csv(RankingId(1), sheet).expect("imports");
    let order: Vec<(u64, u32)> = ranking
        .items
        .iter()
        .map(|item| (item.application.id.0, item.rank_position))
        .collect();
    assert_eq!(order, vec![(3, 1), (2, 2), (1, 3)]);
    assert!(ranking.positions_dense());
}

#[test]
fn import_with_unknown_student_rejects_everything() {
    let service = common::service_with_three();
    let before = service.get(RankingId(1)).expect("fetch");

    let sheet = "Student ID,Name,Rank\nB0000001,Student 1,1\nB9999999,Ghost,2\nB0000003,Student 3,3\n";
    let err = service
        .import_csv(RankingId(1), sheet)
        .expect_err("unknown student");
    match err {
        RankingServiceError::ImportValidation { issues } => {
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].student_id, "B9999999");
            assert_eq!(issues[0].row, 3);
        }
        other => panic!("expected import validation, got {other}"),
    }

    // No partial application.
    let after = service.get(RankingId(1)).expect("fetch");
    assert_eq!(before, after);
}

#[test]
fn import_with_gapped_ranks_is_rejected() {
    let service = common::service_with_three();

    let sheet = "Student ID,Name,Rank\nB0000001,Student 1,1\nB0000002,Student 2,2\nB0000003,Student 3,4\n";
    let err = service.import_csv(RankingId(1), sheet).expect_err("gap");
    assert!(matches!(
        err,
        RankingServiceError::ImportValidation { .. }
    ));
    assert_eq!(err.code(), "IMPORT_VALIDATION");
}

#[test]
fn finalized_ranking_rejects_reorder_and_import() {
    let service = common::service_with_three();
    service.finalize(RankingId(1)).expect("finalizes");

    let err = service
        .reorder(
            RankingId(1),
            &[ApplicationId(2), ApplicationId(1), ApplicationId(3)],
        )
        .expect_err("finalized");
    assert_eq!(err.code(), "RANKING_FINALIZED");

    let sheet = "Student ID,Name,Rank\nB0000001,Student 1,1\nB0000002,Student 2,2\nB0000003,Student 3,3\n";
    let err = service
        .import_csv(RankingId(1), sheet)
        .expect_err("finalized");
    assert_eq!(err.code(), "RANKING_FINALIZED");

    // Finalize is single-shot.
    assert!(service.finalize(RankingId(1)).is_err());
}

#[test]
fn roster_lock_blocks_distribution_until_failure_or_force() {
    let service = common::service_with_three();
    service.distribute(RankingId(1), false).expect("first run");
    service.finalize(RankingId(1)).expect("finalizes");

    service
        .start_roster(RankingId(1), RosterCycle::Monthly, "2025-09")
        .expect("draft roster");
    // Draft roster still allows redistribution.
    service.distribute(RankingId(1), false).expect("draft is open");

    service.run_roster_job(RankingId(1)).expect("completes");
    let status = service.roster_status(RankingId(1)).expect("status");
    assert!(status.has_roster);
    assert!(!status.can_redistribute);

    let err = service
        .distribute(RankingId(1), false)
        .expect_err("pinned by roster");
    assert_eq!(err.code(), "DISTRIBUTION_LOCKED");

    // Explicit override is still honored.
    service.distribute(RankingId(1), true).expect("forced run");

    // Reopen, fail the generation, and the lock lifts.
    service
        .unlock_roster(RankingId(1), "2025-09")
        .expect("unlock");
    service.fail_roster(RankingId(1)).expect("fails");
    service
        .distribute(RankingId(1), false)
        .expect("failed roster reopens distribution");
}

#[test]
fn roster_statistics_count_each_period_once() {
    let service = common::service_with_three();
    service.finalize(RankingId(1)).expect("finalizes");
    service
        .start_roster(RankingId(1), RosterCycle::SemiYearly, "113-1")
        .expect("draft");
    service.run_roster_job(RankingId(1)).expect("completes");
    // At-least-once delivery of the job: a duplicate run is harmless.
    service.run_roster_job(RankingId(1)).expect("idempotent");

    let status = service.roster_status(RankingId(1)).expect("status");
    let stats = status.roster_statistics.expect("statistics");
    assert_eq!(stats.total_periods_completed, 1);
    assert_eq!(stats.expected_total_periods, 2);
    assert!((stats.completion_rate - 50.0).abs() < f64::EPSILON);

    service.unlock_roster(RankingId(1), "113-2").expect("next period");
    service.run_roster_job(RankingId(1)).expect("completes");
    let stats = service
        .roster_status(RankingId(1))
        .expect("status")
        .roster_statistics
        .expect("statistics");
    assert_eq!(stats.total_periods_completed, 2);
}

#[test]
fn locked_roster_is_permanent() {
    let service = common::service_with_three();
    service.finalize(RankingId(1)).expect("finalizes");
    service
        .start_roster(RankingId(1), RosterCycle::Yearly, "113")
        .expect("draft");
    service.run_roster_job(RankingId(1)).expect("completes");
    service.lock_roster(RankingId(1)).expect("locks");

    assert!(service.unlock_roster(RankingId(1), "114").is_err());
    let err = service
        .distribute(RankingId(1), false)
        .expect_err("locked");
    assert_eq!(err.code(), "DISTRIBUTION_LOCKED");
}

#[test]
fn distribution_is_idempotent_across_runs() {
    let service = common::service_with_three();
    let first = service.distribute(RankingId(1), false).expect("runs");
    let second = service.distribute(RankingId(1), false).expect("runs");
    assert_eq!(
        serde_json::to_string(&first).expect("serializes"),
        serde_json::to_string(&second).expect("serializes"),
    );
}

#[test]
fn soft_deleted_application_leaves_the_allocation() {
    let service = common::service_with_three();

    service
        .delete_application(RankingId(1), ApplicationId(1))
        .expect("soft delete");
    let result = service.distribute(RankingId(1), false).expect("runs");
    let cell = &result.cells[0];
    let admitted: Vec<u64> = cell.admitted.iter().map(|e| e.application_id.0).collect();
    assert_eq!(admitted, vec![2, 3], "seat freed by the deleted applicant");
    assert!(cell.backup.is_empty());

    service
        .restore_application(RankingId(1), ApplicationId(1))
        .expect("restore");
    let ranking = service.get(RankingId(1)).expect("fetch");
    assert_eq!(
        ranking.item(ApplicationId(1)).expect("item").application.status.label(),
        "draft"
    );
}

#[test]
fn create_rejects_unconfigured_sub_type() {
    use std::sync::Arc;

    use scholarship_ranking::ranking::{
        InMemoryRankingRepository, Ranking, RankingService, Semester,
    };

    let repository = Arc::new(InMemoryRankingRepository::new());
    let service = RankingService::new(repository, common::quotas());

    let mut ranking = Ranking::new(RankingId(9), "general", 113, Semester::First, 2);
    ranking.push_application(common::application(1, "ENG", &["general", "special"]));
    let err = service
        .create_ranking(ranking)
        .expect_err("no quota rows mention 'special'");
    assert_eq!(err.code(), "UNKNOWN_SUBTYPE");
}

#[test]
fn second_distribution_is_rejected_while_one_is_in_flight() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use scholarship_ranking::ranking::{
        InMemoryRankingRepository, Ranking, RankingRepository, RankingService, Semester,
    };

    // Repository whose next armed fetch parks between two barriers, holding
    // the caller inside its distribution run.
    struct GatedRepository {
        inner: InMemoryRankingRepository,
        entered: Arc<Barrier>,
        release: Arc<Barrier>,
        armed: AtomicBool,
    }

    impl RankingRepository for GatedRepository {
        fn insert(&self, ranking: Ranking) -> Result<(), RepositoryError> {
            self.inner.insert(ranking)
        }

        fn fetch(&self, id: RankingId) -> Result<Ranking, RepositoryError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.fetch(id)
        }

        fn update(&self, ranking: Ranking) -> Result<Ranking, RepositoryError> {
            self.inner.update(ranking)
        }

        fn list(&self) -> Result<Vec<RankingId>, RepositoryError> {
            self.inner.list()
        }
    }

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let repository = Arc::new(GatedRepository {
        inner: InMemoryRankingRepository::new(),
        entered: entered.clone(),
        release: release.clone(),
        armed: AtomicBool::new(false),
    });
    let service = Arc::new(RankingService::new(repository.clone(), common::quotas()));

    let mut ranking = Ranking::new(RankingId(1), "general", 113, Semester::First, 2);
    for id in [1, 2, 3] {
        ranking.push_application(common::application(id, "ENG", &["general"]));
    }
    service.create_ranking(ranking).expect("seed ranking");

    repository.armed.store(true, Ordering::SeqCst);
    let worker = {
        let service = service.clone();
        thread::spawn(move || service.distribute(RankingId(1), false))
    };

    // The worker now holds the run slot, parked inside the repository read.
    entered.wait();
    let err = service
        .distribute(RankingId(1), false)
        .expect_err("a run is already in flight");
    assert_eq!(err.code(), "DISTRIBUTION_IN_PROGRESS");
    assert!(matches!(
        err,
        RankingServiceError::DistributionInProgress(RankingId(1))
    ));

    release.wait();
    let result = worker
        .join()
        .expect("worker thread")
        .expect("first run completes");
    assert_eq!(result.admitted_total(), 2);

    // Slot is released once the first run returns.
    service.distribute(RankingId(1), false).expect("slot free again");
}

#[test]
fn stale_writer_gets_concurrent_modification() {
    use std::sync::Arc;

    use scholarship_ranking::ranking::RankingRepository;

    let service = common::service_with_three();

    // Simulate a second writer committing between this caller's read and
    // write by updating through a raw repository handle.
    let repository = Arc::new(scholarship_ranking::ranking::InMemoryRankingRepository::new());
    repository
        .insert({
            let mut ranking = scholarship_ranking::ranking::Ranking::new(
                RankingId(2),
                "general",
                113,
                scholarship_ranking::ranking::Semester::First,
                2,
            );
            ranking.push_application(common::application(1, "ENG", &["general"]));
            ranking
        })
        .expect("seed");

    let stale = repository.fetch(RankingId(2)).expect("read");
    let fresh = repository.fetch(RankingId(2)).expect("read");
    repository.update(fresh).expect("first writer wins");
    let err = repository.update(stale).expect_err("stale");
    assert!(matches!(
        err,
        RepositoryError::ConcurrentModification { .. }
    ));

    // The facade path still works on its own repository.
    service.distribute(RankingId(1), false).expect("runs");
}
