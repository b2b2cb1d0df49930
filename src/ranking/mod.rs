//! Ranking and quota distribution for scholarship applications.
//!
//! The modules follow the data flow: applications enter a [`domain::Ranking`]
//! after review, the resolver in [`eligibility`] fixes each application's
//! sub-type set at intake, and [`distribution`] partitions a ranking snapshot
//! into admitted, backup, and rejected lists against the [`quota::QuotaTable`].
//! [`roster`] tracks the periodic finalization records that pin an allocation,
//! and [`service`] ties everything together behind the HTTP surface in
//! [`router`].

pub mod distribution;
pub mod domain;
pub mod eligibility;
pub mod quota;
pub mod roster;
pub mod router;
pub mod service;
pub mod sheet;
pub mod store;

pub use distribution::{DistributionResult, RejectionReason};
pub use domain::{
    Application, ApplicationId, ApplicationStatus, Ranking, RankingId, RankingItem, ReorderError,
    ReviewStatus, Semester,
};
pub use eligibility::{EligibilityError, SelectionMode};
pub use quota::{QuotaError, QuotaTable};
pub use roster::{Roster, RosterCycle, RosterStatistics, RosterStatus};
pub use router::ranking_router;
pub use service::{RankingService, RankingServiceError, RosterStatusView};
pub use store::{InMemoryRankingRepository, RankingRepository, RepositoryError};
