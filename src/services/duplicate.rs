//! Duplicate detection
//!
//! A candidate is a duplicate of an existing property when the names
//! match case-insensitively, or when the two points lie within 100 m of
//! each other. Either rule alone is sufficient.

use crate::services::geo::within_duplicate_radius;
use crate::types::{NormalizedProperty, PropertyRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Name,
    Location,
}

#[derive(Debug, Clone)]
pub enum Classification {
    Unique,
    Duplicate {
        matched_on: MatchRule,
        reference: PropertyRef,
    },
}

impl Classification {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Classification::Duplicate { .. })
    }
}

/// Classify a candidate against the existing set. The caller keeps the
/// set live across batches: records persisted earlier in the same run
/// must already be in it.
pub fn classify(candidate: &NormalizedProperty, existing: &[PropertyRef]) -> Classification {
    let candidate_name = candidate.name.to_lowercase();
    let candidate_coords = candidate.coordinates();

    for property in existing {
        if property.name.to_lowercase() == candidate_name {
            return Classification::Duplicate {
                matched_on: MatchRule::Name,
                reference: property.clone(),
            };
        }
        if within_duplicate_radius(&candidate_coords, &property.coordinates) {
            return Classification::Duplicate {
                matched_on: MatchRule::Location,
                reference: property.clone(),
            };
        }
    }
    Classification::Unique
}
