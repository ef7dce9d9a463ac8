use crate::model::ConferenceSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// ReviewType
///
/// Variant order is significant: later variants outrank earlier ones, so a
/// type change to a lower variant is a demotion.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ReviewType {
    External,
    PcOptional,
    Secondary,
    Primary,
    Meta,
}

impl ReviewType {
    /// Whether this review type may only be held by a PC member.
    #[must_use]
    pub const fn requires_pc(self) -> bool {
        !matches!(self, Self::External)
    }

    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::PcOptional => "pcreview",
            Self::Secondary => "secondary",
            Self::Primary => "primary",
            Self::Meta => "meta",
        }
    }

    /// Human label for markup descriptions.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::External => "external review",
            Self::PcOptional => "optional PC review",
            Self::Secondary => "secondary review",
            Self::Primary => "primary review",
            Self::Meta => "metareview",
        }
    }
}

impl fmt::Display for ReviewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

///
/// Review
///
/// One review relation row. `time_submitted > 0` means submitted;
/// `non_draft` means the text has been approved past the draft stage
/// without being submitted yet.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Review {
    pub rtype: ReviewType,
    pub round: String,
    pub time_submitted: i64,
    pub non_draft: bool,
}

impl Review {
    #[must_use]
    pub fn fresh(rtype: ReviewType, round: impl Into<String>) -> Self {
        Self {
            rtype,
            round: round.into(),
            time_submitted: 0,
            non_draft: false,
        }
    }

    #[must_use]
    pub const fn submitted(&self) -> bool {
        self.time_submitted > 0
    }

    /// Whether an unsubmit action has anything to clear.
    #[must_use]
    pub const fn has_progress(&self) -> bool {
        self.submitted() || self.non_draft
    }

    /// Round display, with the unnamed round rendered as `unnamed`.
    #[must_use]
    pub fn round_label(&self) -> &str {
        if self.round.is_empty() {
            "unnamed"
        } else {
            &self.round
        }
    }
}

///
/// ReviewParseError
///

#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum ReviewParseError {
    #[error("unknown review type '{token}'")]
    UnknownType { token: String },

    #[error("review round '{name}' is not defined")]
    UnknownRound { name: String },

    #[error("review value '{value}' has too many ':' separators")]
    MalformedPair { value: String },
}

///
/// ReviewTypeSpec
///
/// One side of a `reviewtype` column: a concrete type, the removal token,
/// or the wildcard.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReviewTypeSpec {
    Any,
    None,
    Type(ReviewType),
}

impl ReviewTypeSpec {
    pub fn parse(token: &str) -> Result<Self, ReviewParseError> {
        match token.trim().to_ascii_lowercase().as_str() {
            "" | "any" | "all" => Ok(Self::Any),
            "none" | "clear" | "no" => Ok(Self::None),
            "primary" | "pri" => Ok(Self::Type(ReviewType::Primary)),
            "secondary" | "sec" => Ok(Self::Type(ReviewType::Secondary)),
            "pcreview" | "optional" | "opt" | "pc" => Ok(Self::Type(ReviewType::PcOptional)),
            "external" | "ext" | "review" => Ok(Self::Type(ReviewType::External)),
            "meta" | "metareview" => Ok(Self::Type(ReviewType::Meta)),
            _ => Err(ReviewParseError::UnknownType {
                token: token.trim().to_string(),
            }),
        }
    }

    #[must_use]
    pub fn matches(self, rtype: ReviewType) -> bool {
        match self {
            Self::Any => true,
            Self::None => false,
            Self::Type(t) => t == rtype,
        }
    }
}

///
/// ReviewSpec
///
/// A full `reviewtype` column, possibly an `old:new` pair.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReviewSpec {
    pub require: Option<ReviewTypeSpec>,
    pub target: ReviewTypeSpec,
}

impl ReviewSpec {
    pub fn parse(value: &str) -> Result<Self, ReviewParseError> {
        let value = value.trim();
        match value.split(':').count() {
            1 => Ok(Self {
                require: None,
                target: ReviewTypeSpec::parse(value)?,
            }),
            2 => {
                let (old, new) = value.split_once(':').unwrap_or_default();
                Ok(Self {
                    require: Some(ReviewTypeSpec::parse(old)?),
                    target: ReviewTypeSpec::parse(new)?,
                })
            }
            _ => Err(ReviewParseError::MalformedPair {
                value: value.to_string(),
            }),
        }
    }
}

///
/// RoundSpec
///
/// A `round` column, possibly an `old:new` pair. `""` is the unnamed round
/// and `any` matches every round. Target round names must be defined in the
/// conference settings.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RoundMatch {
    Any,
    Name(String),
}

impl RoundMatch {
    /// Parse a filter-only round token. Filters may name rounds that are
    /// no longer defined, so nothing is validated here.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() || token.eq_ignore_ascii_case("any") || token.eq_ignore_ascii_case("all")
        {
            Self::Any
        } else if token.eq_ignore_ascii_case("unnamed") {
            Self::Name(String::new())
        } else {
            Self::Name(token.to_string())
        }
    }

    #[must_use]
    pub fn matches(&self, round: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Name(name) => name.eq_ignore_ascii_case(round),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoundSpec {
    pub require: Option<RoundMatch>,
    pub target: RoundMatch,
}

impl RoundSpec {
    /// A missing round column: match any round, change nothing.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            require: None,
            target: RoundMatch::Any,
        }
    }

    pub fn parse(value: &str, settings: &ConferenceSettings) -> Result<Self, ReviewParseError> {
        let value = value.trim();
        match value.split(':').count() {
            1 => Ok(Self {
                require: None,
                target: Self::parse_side(value, settings, true)?,
            }),
            2 => {
                let (old, new) = value.split_once(':').unwrap_or_default();
                Ok(Self {
                    require: Some(Self::parse_side(old, settings, false)?),
                    target: Self::parse_side(new, settings, true)?,
                })
            }
            _ => Err(ReviewParseError::MalformedPair {
                value: value.to_string(),
            }),
        }
    }

    // The require side may name a round that no longer exists; the target
    // side must be a defined round.
    fn parse_side(
        value: &str,
        settings: &ConferenceSettings,
        target: bool,
    ) -> Result<RoundMatch, ReviewParseError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("any") || value.eq_ignore_ascii_case("all") {
            return Ok(RoundMatch::Any);
        }
        if value.is_empty() || value.eq_ignore_ascii_case("unnamed") {
            return Ok(RoundMatch::Name(String::new()));
        }
        if target && !settings.round_is_defined(value) {
            return Err(ReviewParseError::UnknownRound {
                name: value.to_string(),
            });
        }
        Ok(RoundMatch::Name(value.to_string()))
    }
}

///
/// TESTS
///
