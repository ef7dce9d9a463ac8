use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// ConflictType
///
/// Bitmask classifying one user's conflict of interest with one paper.
/// Authorship bits (`AUTHOR`, `CONTACT`) are set by the submission side of
/// the system; the assignment engine never clears `AUTHOR`, and clearing
/// `CONTACT` is guarded by the last-contact rule in the conflict kind.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ConflictType(u32);

impl ConflictType {
    pub const NONE: Self = Self(0);
    /// Only an administrator may set or clear the pin.
    pub const PINNED: Self = Self(0x01);
    pub const COLLABORATOR: Self = Self(0x02);
    pub const ADVISOR: Self = Self(0x04);
    pub const INSTITUTIONAL: Self = Self(0x08);
    pub const PERSONAL: Self = Self(0x10);
    pub const OTHER: Self = Self(0x20);
    pub const AUTHOR: Self = Self(0x40);
    pub const CONTACT: Self = Self(0x80);

    /// Classification bits a conflict sheet may edit.
    const EDITABLE: Self = Self(0x02 | 0x04 | 0x08 | 0x10 | 0x20 | 0x80);
    /// Any bit that makes the user conflicted for reviewing purposes.
    const CONFLICTED: Self = Self(0x02 | 0x04 | 0x08 | 0x10 | 0x20 | 0x40 | 0x80);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn insert(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_conflicted(self) -> bool {
        self.0 & Self::CONFLICTED.0 != 0
    }

    #[must_use]
    pub const fn is_pinned(self) -> bool {
        self.contains(Self::PINNED)
    }

    #[must_use]
    pub const fn is_author(self) -> bool {
        self.contains(Self::AUTHOR)
    }

    #[must_use]
    pub const fn is_contact(self) -> bool {
        self.contains(Self::CONTACT)
    }

    /// The editable classification, ignoring the pin and authorship marker.
    #[must_use]
    pub const fn classification(self) -> Self {
        Self(self.0 & Self::EDITABLE.0)
    }

    /// Canonical token list for CSV export and markup.
    #[must_use]
    pub fn tokens(self) -> String {
        if !self.is_conflicted() {
            return "none".to_string();
        }
        let mut out = Vec::new();
        for (bit, token) in [
            (Self::COLLABORATOR, "collaborator"),
            (Self::ADVISOR, "advisor"),
            (Self::INSTITUTIONAL, "institutional"),
            (Self::PERSONAL, "personal"),
            (Self::OTHER, "other"),
            (Self::AUTHOR, "author"),
            (Self::CONTACT, "contact"),
        ] {
            if self.contains(bit) {
                out.push(token);
            }
        }
        if self.is_pinned() {
            out.push("pinned");
        }
        out.join(" ")
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens())
    }
}

///
/// ConflictParseError
///

#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum ConflictParseError {
    #[error("unknown conflict token '{token}'")]
    UnknownToken { token: String },

    #[error("conflict value '{value}' has too many ':' separators")]
    MalformedPair { value: String },
}

///
/// ConflictSpec
///
/// Parsed form of a `conflict` column: what to set, what to clear, how the
/// pin changes, and (for an `old:new` pair) which prior classification the
/// edit applies to. Spec parsing is pure; admin gating happens at apply.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConflictSpec {
    /// For `old:new` pairs: apply only when the current classification
    /// equals this value.
    pub require: Option<ConflictType>,
    pub set: ConflictType,
    pub clear: ConflictType,
    pub pin: Option<bool>,
}

impl ConflictSpec {
    pub fn parse(value: &str) -> Result<Self, ConflictParseError> {
        let value = value.trim();
        match value.split(':').count() {
            1 => Self::parse_tokens(value),
            2 => {
                let (old, new) = value.split_once(':').unwrap_or_default();
                let old = Self::parse_tokens(old)?;
                let mut spec = Self::parse_tokens(new)?;
                spec.require = Some(old.net(ConflictType::NONE).classification());
                Ok(spec)
            }
            _ => Err(ConflictParseError::MalformedPair {
                value: value.to_string(),
            }),
        }
    }

    fn parse_tokens(value: &str) -> Result<Self, ConflictParseError> {
        let mut spec = Self::default();
        let tokens = value
            .split([' ', ',', '+'])
            .map(str::trim)
            .filter(|t| !t.is_empty());
        for token in tokens {
            match token.to_ascii_lowercase().as_str() {
                "none" | "no" | "unconflicted" | "clear" => {
                    spec.clear = spec.clear.insert(ConflictType::EDITABLE);
                }
                "yes" | "conflict" | "y" => spec.set = spec.set.insert(ConflictType::OTHER),
                "collaborator" => spec.set = spec.set.insert(ConflictType::COLLABORATOR),
                "advisor" | "student" => spec.set = spec.set.insert(ConflictType::ADVISOR),
                "institutional" | "institution" => {
                    spec.set = spec.set.insert(ConflictType::INSTITUTIONAL);
                }
                "personal" => spec.set = spec.set.insert(ConflictType::PERSONAL),
                "other" => spec.set = spec.set.insert(ConflictType::OTHER),
                "contact" => spec.set = spec.set.insert(ConflictType::CONTACT),
                // Authorship comes from the submission side. The token is
                // accepted so exported rows replay, but it grants no bit.
                "author" => {}
                "pinned" | "pin" => spec.pin = Some(true),
                "unpinned" | "unpin" => spec.pin = Some(false),
                _ => {
                    return Err(ConflictParseError::UnknownToken {
                        token: token.to_string(),
                    });
                }
            }
        }
        Ok(spec)
    }

    /// The classification this spec produces when applied to `prev`,
    /// ignoring pin handling and the require guard.
    #[must_use]
    pub const fn net(&self, prev: ConflictType) -> ConflictType {
        prev.remove(self.clear).insert(self.set)
    }
}

///
/// TESTS
///
