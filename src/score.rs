use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    Accumulator, AggregatedResult, FacultyResult, ProgramKey, ProgramResult, VersionSchema,
    VoteTally,
};

/// Rounds to two decimals, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Mean vote as a percentage of the maximum answer (5).
pub fn tally_percentage(tally: &VoteTally) -> f64 {
    let total = tally.total();
    if total == 0 {
        return 0.0;
    }
    round2(tally.weighted_sum() as f64 / (5 * total) as f64 * 100.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn criterion_percentages<'a>(
    criteria: &[String],
    lookup: impl Fn(&str) -> Option<&'a VoteTally>,
) -> Vec<f64> {
    criteria
        .iter()
        .map(|criterion| lookup(criterion).map(tally_percentage).unwrap_or(0.0))
        .collect()
}

fn sort_descending<T>(items: &mut [T], overall: impl Fn(&T) -> f64) {
    // stable: ties keep accumulator key order
    items.sort_by(|a, b| overall(b).total_cmp(&overall(a)));
}

/// Turns vote counts into the percentages published for a version.
///
/// Program overall is the plain mean of its criterion percentages, faculty
/// overall the plain mean of its programs, and the global figure the plain
/// mean of the faculties. None of the levels are weighted by vote counts.
pub fn compute_result(schema: &VersionSchema, acc: &Accumulator) -> AggregatedResult {
    let criteria = schema.normalized_criteria();

    let mut programs_by_faculty: BTreeMap<&str, Vec<ProgramResult>> = BTreeMap::new();
    for faculty in acc.faculty_tallies().map(|(_, faculty, _)| faculty) {
        programs_by_faculty.entry(faculty).or_default();
    }
    let program_keys: BTreeSet<&ProgramKey> =
        acc.program_tallies().map(|(_, key, _)| key).collect();
    for key in program_keys {
        let percentages =
            criterion_percentages(&criteria, |criterion| acc.program_tally(criterion, key));
        programs_by_faculty
            .entry(key.faculty.as_str())
            .or_default()
            .push(ProgramResult {
                name: key.program.clone(),
                overall: round2(mean(&percentages)),
                criteria: percentages,
            });
    }

    let mut faculties: Vec<FacultyResult> = programs_by_faculty
        .into_iter()
        .map(|(faculty, mut programs)| {
            sort_descending(&mut programs, |p| p.overall);
            let overall = round2(mean(
                &programs.iter().map(|p| p.overall).collect::<Vec<_>>(),
            ));
            FacultyResult {
                name: faculty.to_string(),
                overall,
                criteria: criterion_percentages(&criteria, |criterion| {
                    acc.faculty_tally(criterion, faculty)
                }),
                programs,
            }
        })
        .collect();
    sort_descending(&mut faculties, |f| f.overall);

    let global = round2(mean(
        &faculties.iter().map(|f| f.overall).collect::<Vec<_>>(),
    ));

    AggregatedResult {
        criteria,
        faculties,
        global,
    }
}
