use crate::model::PaperId;
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// Paper
///
/// Submission-status encoding: `time_submitted` is `0` for a draft,
/// positive when submitted, and negated while the paper is withdrawn so a
/// revive can restore the exact pre-withdraw timestamp. `time_withdrawn`
/// is nonzero while withdrawn.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Paper {
    pub id: PaperId,
    pub title: String,
    pub time_submitted: i64,
    pub time_withdrawn: i64,
    pub withdraw_reason: Option<String>,
    /// Decision: positive accepted, negative rejected, zero undecided.
    pub outcome: i32,
}

impl Paper {
    #[must_use]
    pub fn new(id: PaperId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            time_submitted: 0,
            time_withdrawn: 0,
            withdraw_reason: None,
            outcome: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> PaperState {
        if self.time_withdrawn > 0 {
            if self.time_submitted == 0 {
                PaperState::WithdrawnUnsubmitted
            } else {
                PaperState::WithdrawnSubmitted
            }
        } else if self.time_submitted > 0 {
            PaperState::Submitted
        } else {
            PaperState::Draft
        }
    }

    /// Counts toward the cached accepted-paper total.
    #[must_use]
    pub const fn counts_as_accepted(&self) -> bool {
        self.outcome > 0 && self.time_submitted > 0 && self.time_withdrawn == 0
    }
}

///
/// PaperState
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PaperState {
    Draft,
    Submitted,
    WithdrawnUnsubmitted,
    WithdrawnSubmitted,
}

impl fmt::Display for PaperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::WithdrawnUnsubmitted => "withdrawn",
            Self::WithdrawnSubmitted => "withdrawn (was submitted)",
        };
        write!(f, "{label}")
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_covers_all_encodings() {
        let mut paper = Paper::new(PaperId(1), "t");
        assert_eq!(paper.state(), PaperState::Draft);

        paper.time_submitted = 100;
        assert_eq!(paper.state(), PaperState::Submitted);

        paper.time_withdrawn = 200;
        paper.time_submitted = -100;
        assert_eq!(paper.state(), PaperState::WithdrawnSubmitted);

        paper.time_submitted = 0;
        assert_eq!(paper.state(), PaperState::WithdrawnUnsubmitted);
    }

    #[test]
    fn serialized_form_keeps_the_status_encoding() {
        let mut paper = Paper::new(PaperId(3), "t");
        paper.time_submitted = -100;
        paper.time_withdrawn = 200;
        paper.withdraw_reason = Some("dup".to_string());

        let json = serde_json::to_string(&paper).unwrap();
        let restored: Paper = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, paper);
        assert_eq!(restored.state(), PaperState::WithdrawnSubmitted);
    }

    #[test]
    fn withdrawn_papers_never_count_as_accepted() {
        let mut paper = Paper::new(PaperId(1), "t");
        paper.time_submitted = 100;
        paper.outcome = 1;
        assert!(paper.counts_as_accepted());

        paper.time_withdrawn = 200;
        paper.time_submitted = -100;
        assert!(!paper.counts_as_accepted());
    }
}
