use crate::models::{Accumulator, ProgramKey, RawRow, VersionSchema};
use crate::normalize::group_label_of;
use crate::vote::extract_vote;

/// Tallies the votes in one page of rows.
///
/// The result depends only on the rows themselves, never on where the page
/// sits in the dataset.
pub fn aggregate_chunk(schema: &VersionSchema, rows: &[RawRow]) -> Accumulator {
    let criteria: Vec<(&str, String)> = schema
        .criteria
        .iter()
        .map(String::as_str)
        .zip(schema.normalized_criteria())
        .collect();

    let mut acc = Accumulator::default();
    for row in rows {
        let key = ProgramKey::new(
            group_label_of(row.get(&schema.faculty_column)),
            group_label_of(row.get(&schema.program_column)),
        );
        for (raw_label, criterion) in &criteria {
            if let Some(vote) = extract_vote(row.get(*raw_label)) {
                acc.record(criterion, &key, vote);
            }
        }
    }
    acc
}

/// Element-wise sum of two accumulators.
pub fn merge(mut a: Accumulator, b: Accumulator) -> Accumulator {
    merge_into(&mut a, b);
    a
}

/// Folds `other` into `target`, treating absent tallies as zero.
pub fn merge_into(target: &mut Accumulator, other: Accumulator) {
    for (key, tally) in other.faculties {
        target.faculties.entry(key).or_default().add(&tally);
    }
    for (key, tally) in other.programs {
        target.programs.entry(key).or_default().add(&tally);
    }
}

pub fn merge_all<I>(parts: I) -> Accumulator
where
    I: IntoIterator<Item = Accumulator>,
{
    parts.into_iter().fold(Accumulator::default(), merge)
}
