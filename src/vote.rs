use serde_json::Value;

use crate::normalize::cell_text;

/// A single Likert answer, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vote(u8);

impl Vote {
    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Zero-based slot inside a [`crate::models::VoteTally`].
    pub fn slot(self) -> usize {
        usize::from(self.0 - 1)
    }
}

/// Reads the first digit between 1 and 5 out of a response cell.
///
/// Decorated answers such as `"4 ★"` still count; anything without such a
/// digit is no vote.
pub fn extract_vote(cell: Option<&Value>) -> Option<Vote> {
    let text = cell_text(cell)?;
    text.trim()
        .chars()
        .find(|c| ('1'..='5').contains(c))
        .and_then(|c| c.to_digit(10))
        .and_then(|digit| Vote::new(digit as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vote_of(value: Value) -> Option<u8> {
        extract_vote(Some(&value)).map(Vote::value)
    }

    #[test]
    fn plain_answers_are_read_directly() {
        assert_eq!(vote_of(json!("1")), Some(1));
        assert_eq!(vote_of(json!(" 5 ")), Some(5));
        assert_eq!(vote_of(json!(4)), Some(4));
        assert_eq!(vote_of(json!(2.0)), Some(2));
    }

    #[test]
    fn decorated_answers_use_first_valid_digit() {
        assert_eq!(vote_of(json!("3★")), Some(3));
        assert_eq!(vote_of(json!("★★ 4")), Some(4));
        assert_eq!(vote_of(json!("0 or 2")), Some(2));
    }

    #[test]
    fn answers_without_a_valid_digit_are_no_vote() {
        assert_eq!(vote_of(json!("no aplica")), None);
        assert_eq!(vote_of(json!("")), None);
        assert_eq!(vote_of(json!("   ")), None);
        assert_eq!(vote_of(json!(6)), None);
        assert_eq!(vote_of(json!("0")), None);
        assert_eq!(vote_of(Value::Null), None);
        assert_eq!(extract_vote(None), None);
    }

    #[test]
    fn vote_rejects_out_of_range_values() {
        assert!(Vote::new(0).is_none());
        assert!(Vote::new(6).is_none());
        assert_eq!(Vote::new(3).map(Vote::slot), Some(2));
    }
}
