use std::collections::HashMap;
use std::sync::Mutex;

use super::domain::{Ranking, RankingId};

/// Storage abstraction so the service can be exercised in isolation.
///
/// `update` carries the version the caller read; a mismatch means a
/// concurrent writer won and the caller must refetch.
pub trait RankingRepository: Send + Sync {
    fn insert(&self, ranking: Ranking) -> Result<(), RepositoryError>;
    fn fetch(&self, id: RankingId) -> Result<Ranking, RepositoryError>;
    fn update(&self, ranking: Ranking) -> Result<Ranking, RepositoryError>;
    fn list(&self) -> Result<Vec<RankingId>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("ranking {} already exists", .0 .0)]
    Conflict(RankingId),
    #[error("ranking {} not found", .0 .0)]
    NotFound(RankingId),
    #[error("ranking {} was modified concurrently (stored version {stored}, caller saw {seen})", ranking.0)]
    ConcurrentModification {
        ranking: RankingId,
        stored: u64,
        seen: u64,
    },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub const fn code(&self) -> &'static str {
        match self {
            RepositoryError::Conflict(_) => "RANKING_EXISTS",
            RepositoryError::NotFound(_) => "RANKING_NOT_FOUND",
            RepositoryError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            RepositoryError::Unavailable(_) => "REPOSITORY_UNAVAILABLE",
        }
    }
}

/// Mutex-guarded map, the default backing until a database sits behind the
/// trait.
#[derive(Default)]
pub struct InMemoryRankingRepository {
    rankings: Mutex<HashMap<RankingId, Ranking>>,
}

impl InMemoryRankingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RankingRepository for InMemoryRankingRepository {
    fn insert(&self, ranking: Ranking) -> Result<(), RepositoryError> {
        let mut rankings = self
            .rankings
            .lock()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        if rankings.contains_key(&ranking.id) {
            return Err(RepositoryError::Conflict(ranking.id));
        }
        rankings.insert(ranking.id, ranking);
        Ok(())
    }

    fn fetch(&self, id: RankingId) -> Result<Ranking, RepositoryError> {
        let rankings = self
            .rankings
            .lock()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        rankings
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    fn update(&self, mut ranking: Ranking) -> Result<Ranking, RepositoryError> {
        let mut rankings = self
            .rankings
            .lock()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        let stored = rankings
            .get(&ranking.id)
            .ok_or(RepositoryError::NotFound(ranking.id))?;
        if stored.version != ranking.version {
            return Err(RepositoryError::ConcurrentModification {
                ranking: ranking.id,
                stored: stored.version,
                seen: ranking.version,
            });
        }
        ranking.version += 1;
        rankings.insert(ranking.id, ranking.clone());
        Ok(ranking)
    }

    fn list(&self) -> Result<Vec<RankingId>, RepositoryError> {
        let rankings = self
            .rankings
            .lock()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        let mut ids: Vec<RankingId> = rankings.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::domain::Semester;

    fn ranking(id: u64) -> Ranking {
        Ranking::new(RankingId(id), "general", 113, Semester::First, 2)
    }

    #[test]
    fn insert_then_fetch_round_trips() {
        let repository = InMemoryRankingRepository::new();
        repository.insert(ranking(1)).expect("inserts");
        let stored = repository.fetch(RankingId(1)).expect("fetches");
        assert_eq!(stored.id, RankingId(1));
        assert_eq!(stored.version, 0);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let repository = InMemoryRankingRepository::new();
        repository.insert(ranking(1)).expect("inserts");
        let err = repository.insert(ranking(1)).expect_err("duplicate");
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[test]
    fn update_bumps_version() {
        let repository = InMemoryRankingRepository::new();
        repository.insert(ranking(1)).expect("inserts");
        let stored = repository.fetch(RankingId(1)).expect("fetches");
        let updated = repository.update(stored).expect("updates");
        assert_eq!(updated.version, 1);
    }

    #[test]
    fn stale_update_is_rejected() {
        let repository = InMemoryRankingRepository::new();
        repository.insert(ranking(1)).expect("inserts");

        let first = repository.fetch(RankingId(1)).expect("fetches");
        let second = first.clone();
        repository.update(first).expect("first writer wins");

        let err = repository.update(second).expect_err("stale version");
        assert!(matches!(
            err,
            RepositoryError::ConcurrentModification {
                stored: 1,
                seen: 0,
                ..
            }
        ));
        assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
    }

    #[test]
    fn missing_ranking_is_not_found() {
        let repository = InMemoryRankingRepository::new();
        let err = repository.fetch(RankingId(9)).expect_err("absent");
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
