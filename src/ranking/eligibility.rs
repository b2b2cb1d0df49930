use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How a scholarship lets applicants pick sub-types.
///
/// Hierarchical mode carries the configured order because eligibility is
/// prefix-closed over it: picking a rung implies the rungs below, and a
/// selection with a gap is rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "codes")]
pub enum SelectionMode {
    Single(BTreeSet<String>),
    Multiple(BTreeSet<String>),
    Hierarchical(Vec<String>),
}

/// Compute the sub-types an application qualifies for.
///
/// Pure over (requested, mode); never consults quotas or rankings.
pub fn resolve(
    requested: &BTreeSet<String>,
    mode: &SelectionMode,
) -> Result<BTreeSet<String>, EligibilityError> {
    match mode {
        SelectionMode::Single(configured) => {
            let mut iter = requested.iter();
            let code = match (iter.next(), iter.next()) {
                (Some(code), None) => code,
                _ => {
                    return Err(EligibilityError::SingleSelectionRequired {
                        selected: requested.len(),
                    })
                }
            };
            if !configured.contains(code) {
                return Err(EligibilityError::UnknownSubType { code: code.clone() });
            }
            Ok(BTreeSet::from([code.clone()]))
        }
        SelectionMode::Multiple(configured) => {
            Ok(requested.intersection(configured).cloned().collect())
        }
        SelectionMode::Hierarchical(ordered) => {
            for code in requested {
                if !ordered.contains(code) {
                    return Err(EligibilityError::UnknownSubType { code: code.clone() });
                }
            }
            // Prefix closure: the selection must match the first k rungs.
            for (index, code) in ordered.iter().enumerate() {
                let selected = requested.contains(code);
                let expected = index < requested.len();
                if selected != expected {
                    return Err(EligibilityError::InvalidSubTypeSelection {
                        skipped: code.clone(),
                    });
                }
            }
            Ok(requested.clone())
        }
    }
}

/// Raised when a sub-type selection is inconsistent with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EligibilityError {
    #[error("exactly one sub-type must be selected, got {selected}")]
    SingleSelectionRequired { selected: usize },
    #[error("sub-type '{code}' is not configured for this scholarship")]
    UnknownSubType { code: String },
    #[error("hierarchical selection skips rung '{skipped}'")]
    InvalidSubTypeSelection { skipped: String },
}

impl EligibilityError {
    pub const fn code(&self) -> &'static str {
        match self {
            EligibilityError::SingleSelectionRequired { .. } => "SINGLE_SELECTION_REQUIRED",
            EligibilityError::UnknownSubType { .. } => "UNKNOWN_SUBTYPE",
            EligibilityError::InvalidSubTypeSelection { .. } => "INVALID_SUBTYPE_SELECTION",
        }
    }
}
