use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::normalize_criterion_label;
use crate::vote::Vote;

pub type VersionId = Uuid;

/// One ingested survey response, keyed by column header.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Column mapping recorded when a dataset version is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSchema {
    pub faculty_column: String,
    pub program_column: String,
    pub criteria: Vec<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

impl VersionSchema {
    /// Normalized criterion labels, in schema order.
    pub fn normalized_criteria(&self) -> Vec<String> {
        self.criteria
            .iter()
            .map(|label| normalize_criterion_label(label))
            .collect()
    }

    /// Checks that no two criteria collapse onto the same label.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for (raw, normalized) in self.criteria.iter().zip(self.normalized_criteria()) {
            if normalized.is_empty() {
                return Err(format!("criterion {raw:?} normalizes to an empty label"));
            }
            if !seen.insert(normalized.clone()) {
                return Err(format!("criterion {raw:?} duplicates {normalized:?}"));
            }
        }
        Ok(())
    }
}

/// Equality predicate on a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:?}", self.column, self.value)
    }
}

/// Counts of votes 1 through 5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteTally([u64; 5]);

impl VoteTally {
    pub fn from_counts(counts: [u64; 5]) -> Self {
        Self(counts)
    }

    pub fn counts(&self) -> [u64; 5] {
        self.0
    }

    pub fn record(&mut self, vote: Vote) {
        self.0[vote.slot()] += 1;
    }

    pub fn add(&mut self, other: &VoteTally) {
        for (count, extra) in self.0.iter_mut().zip(other.0) {
            *count += extra;
        }
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Sum of `vote * count` over the five slots.
    pub fn weighted_sum(&self) -> u64 {
        self.0
            .iter()
            .zip(1u64..)
            .map(|(count, weight)| count * weight)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramKey {
    pub faculty: String,
    pub program: String,
}

impl ProgramKey {
    pub fn new(faculty: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            faculty: faculty.into(),
            program: program.into(),
        }
    }
}

/// Vote tallies per criterion at faculty and at program level.
///
/// Both tables are ordered maps, so two accumulators holding the same counts
/// compare (and serialize) identically no matter how they were assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "AccumulatorRepr", from = "AccumulatorRepr")]
pub struct Accumulator {
    pub(crate) faculties: BTreeMap<(String, String), VoteTally>,
    pub(crate) programs: BTreeMap<(String, ProgramKey), VoteTally>,
}

impl Accumulator {
    pub fn is_empty(&self) -> bool {
        self.faculties.is_empty() && self.programs.is_empty()
    }

    pub fn faculty_tally(&self, criterion: &str, faculty: &str) -> Option<&VoteTally> {
        self.faculties
            .get(&(criterion.to_string(), faculty.to_string()))
    }

    pub fn program_tally(&self, criterion: &str, key: &ProgramKey) -> Option<&VoteTally> {
        self.programs.get(&(criterion.to_string(), key.clone()))
    }

    pub fn faculty_tallies(&self) -> impl Iterator<Item = (&str, &str, &VoteTally)> {
        self.faculties
            .iter()
            .map(|((criterion, faculty), tally)| (criterion.as_str(), faculty.as_str(), tally))
    }

    pub fn program_tallies(&self) -> impl Iterator<Item = (&str, &ProgramKey, &VoteTally)> {
        self.programs
            .iter()
            .map(|((criterion, key), tally)| (criterion.as_str(), key, tally))
    }

    /// Records one vote at both levels.
    pub fn record(&mut self, criterion: &str, key: &ProgramKey, vote: Vote) {
        self.faculties
            .entry((criterion.to_string(), key.faculty.clone()))
            .or_default()
            .record(vote);
        self.programs
            .entry((criterion.to_string(), key.clone()))
            .or_default()
            .record(vote);
    }

    /// Every program's faculty also has a faculty-level tally for the same criterion.
    pub fn is_consistent(&self) -> bool {
        self.programs.keys().all(|(criterion, key)| {
            self.faculties
                .contains_key(&(criterion.clone(), key.faculty.clone()))
        })
    }
}

#[derive(Serialize, Deserialize)]
struct AccumulatorRepr {
    faculties: Vec<TallyEntry>,
    programs: Vec<TallyEntry>,
}

#[derive(Serialize, Deserialize)]
struct TallyEntry {
    criterion: String,
    faculty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    program: Option<String>,
    counts: VoteTally,
}

impl From<Accumulator> for AccumulatorRepr {
    fn from(acc: Accumulator) -> Self {
        let faculties = acc
            .faculties
            .into_iter()
            .map(|((criterion, faculty), counts)| TallyEntry {
                criterion,
                faculty,
                program: None,
                counts,
            })
            .collect();
        let programs = acc
            .programs
            .into_iter()
            .map(|((criterion, key), counts)| TallyEntry {
                criterion,
                faculty: key.faculty,
                program: Some(key.program),
                counts,
            })
            .collect();
        Self {
            faculties,
            programs,
        }
    }
}

impl From<AccumulatorRepr> for Accumulator {
    fn from(repr: AccumulatorRepr) -> Self {
        let mut acc = Accumulator::default();
        for entry in repr.faculties {
            acc.faculties
                .entry((entry.criterion, entry.faculty))
                .or_default()
                .add(&entry.counts);
        }
        for entry in repr.programs {
            let key = ProgramKey::new(entry.faculty, entry.program.unwrap_or_default());
            acc.programs
                .entry((entry.criterion, key))
                .or_default()
                .add(&entry.counts);
        }
        acc
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramResult {
    pub name: String,
    pub overall: f64,
    pub criteria: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacultyResult {
    pub name: String,
    pub overall: f64,
    pub criteria: Vec<f64>,
    pub programs: Vec<ProgramResult>,
}

/// Satisfaction percentages for one dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub criteria: Vec<String>,
    pub faculties: Vec<FacultyResult>,
    pub global: f64,
}

impl AggregatedResult {
    pub fn is_empty(&self) -> bool {
        self.faculties.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: AggregatedResult,
    pub accumulator: Accumulator,
    pub computed_at: DateTime<Utc>,
}

/// What a caller gets back from an aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationOutcome {
    pub result: AggregatedResult,
    pub from_cache: bool,
    pub requested_filter: Option<RowFilter>,
    pub applied_filter: Option<RowFilter>,
}

impl AggregationOutcome {
    pub fn filter_dropped(&self) -> bool {
        self.requested_filter.is_some() && self.applied_filter.is_none()
    }
}
