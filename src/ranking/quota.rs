use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per (sub-type, college) admission quotas.
///
/// A cell holding zero is a real configuration: no admits, but demand for the
/// cell is still reported. A cell that was never configured is an error at
/// lookup time, never an implicit zero or an implicit "unlimited".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaTable {
    cells: BTreeMap<String, BTreeMap<String, u32>>,
    sub_type_order: Vec<String>,
}

impl QuotaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the quota for one (sub-type, college) cell.
    ///
    /// Sub-types keep their first-seen order, which fixes the pass order of
    /// the distribution engine.
    pub fn set(&mut self, sub_type: impl Into<String>, college: impl Into<String>, quota: u32) {
        let sub_type = sub_type.into();
        if !self.sub_type_order.contains(&sub_type) {
            self.sub_type_order.push(sub_type.clone());
        }
        self.cells
            .entry(sub_type)
            .or_default()
            .insert(college.into(), quota);
    }

    pub fn get(&self, sub_type: &str, college: &str) -> Result<u32, QuotaError> {
        self.cells
            .get(sub_type)
            .and_then(|colleges| colleges.get(college))
            .copied()
            .ok_or_else(|| QuotaError::Missing {
                sub_type: sub_type.to_string(),
                college: college.to_string(),
            })
    }

    /// Aggregate quota for a sub-type across every configured college.
    pub fn total_quota(&self, sub_type: &str) -> Result<u32, QuotaError> {
        self.cells
            .get(sub_type)
            .map(|colleges| colleges.values().sum())
            .ok_or_else(|| QuotaError::UnknownSubType {
                sub_type: sub_type.to_string(),
            })
    }

    /// Sub-type codes in registration order.
    pub fn sub_types(&self) -> &[String] {
        &self.sub_type_order
    }

    /// Colleges configured for a sub-type, in stable (alphabetical) order.
    pub fn colleges<'a>(&'a self, sub_type: &str) -> impl Iterator<Item = (&'a str, u32)> + 'a {
        self.cells
            .get(sub_type)
            .into_iter()
            .flat_map(|colleges| colleges.iter().map(|(code, quota)| (code.as_str(), *quota)))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Raised when the quota configuration does not cover a requested cell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("no quota configured for sub-type '{sub_type}' at college '{college}'")]
    Missing { sub_type: String, college: String },
    #[error("sub-type '{sub_type}' has no quota configuration")]
    UnknownSubType { sub_type: String },
}

impl QuotaError {
    pub const fn code(&self) -> &'static str {
        match self {
            QuotaError::Missing { .. } => "QUOTA_MISSING",
            QuotaError::UnknownSubType { .. } => "QUOTA_UNKNOWN_SUBTYPE",
        }
    }
}
