pub mod conflict;
pub mod paper;
pub mod review;
pub mod user;

pub use conflict::{ConflictSpec, ConflictType};
pub use paper::{Paper, PaperState};
pub use review::{Review, ReviewSpec, ReviewType, ReviewTypeSpec, RoundMatch, RoundSpec};
pub use user::{Actor, User};

use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// PaperId
///

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[display("#{_0}")]
pub struct PaperId(pub u32);

///
/// UserId
///
/// Zero is the "nobody assigned" sentinel. It may appear as the secondary
/// subject of a paper-scoped item (status rows), never as an acting subject.
///

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[display("u{_0}")]
pub struct UserId(pub u32);

impl UserId {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

///
/// Now
///
/// The batch clock, injected once at batch start so an entire batch is
/// internally consistent and tests can pin it.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Now(pub i64);

impl Now {
    /// Current wall-clock time in unix seconds.
    #[must_use]
    pub fn wall() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    #[must_use]
    pub const fn secs(self) -> i64 {
        self.0
    }
}

///
/// ConferenceSettings
///
/// The slice of conference configuration the engine consults: declared
/// review rounds, vote-tag base names, the cached accepted-paper count,
/// and whether external reviewers are notified on assignment.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ConferenceSettings {
    pub rounds: Vec<String>,
    pub vote_tags: Vec<String>,
    pub accepted_count: u64,
    pub notify_external_reviews: bool,
}

impl ConferenceSettings {
    /// The unnamed round (empty string) is always defined.
    #[must_use]
    pub fn round_is_defined(&self, name: &str) -> bool {
        name.is_empty() || self.rounds.iter().any(|r| r.eq_ignore_ascii_case(name))
    }

    /// Whether a bare tag base name (the part after `uid~`) is a vote tag.
    #[must_use]
    pub fn is_vote_tag(&self, base: &str) -> bool {
        self.vote_tags.iter().any(|t| t.eq_ignore_ascii_case(base))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_round_is_always_defined() {
        let settings = ConferenceSettings::default();
        assert!(settings.round_is_defined(""));
        assert!(!settings.round_is_defined("R1"));
    }

    #[test]
    fn round_lookup_ignores_case() {
        let settings = ConferenceSettings {
            rounds: vec!["R1".to_string()],
            ..ConferenceSettings::default()
        };
        assert!(settings.round_is_defined("r1"));
    }

    #[test]
    fn user_id_zero_is_the_none_sentinel() {
        assert!(UserId::NONE.is_none());
        assert!(!UserId(3).is_none());
    }
}
