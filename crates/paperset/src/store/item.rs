use crate::{
    message::Landmark,
    model::{ConflictType, PaperId, PaperState, Review, UserId},
};
use std::fmt;

///
/// ItemKind
///
/// Staged-state kinds. Field order in `ItemKey` makes the map cluster by
/// kind, then paper, so per-paper queries are range scans.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ItemKind {
    Conflict,
    Review,
    Status,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Conflict => "conflict",
            Self::Review => "review",
            Self::Status => "status",
        };
        write!(f, "{label}")
    }
}

///
/// ItemKey
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct ItemKey {
    pub kind: ItemKind,
    pub pid: PaperId,
    pub uid: UserId,
}

impl ItemKey {
    #[must_use]
    pub const fn conflict(pid: PaperId, uid: UserId) -> Self {
        Self {
            kind: ItemKind::Conflict,
            pid,
            uid,
        }
    }

    #[must_use]
    pub const fn review(pid: PaperId, uid: UserId) -> Self {
        Self {
            kind: ItemKind::Review,
            pid,
            uid,
        }
    }

    /// Status rows are paper-scoped; the user slot holds the sentinel.
    #[must_use]
    pub const fn status(pid: PaperId) -> Self {
        Self {
            kind: ItemKind::Status,
            pid,
            uid: UserId::NONE,
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uid.is_none() {
            write!(f, "{} {}", self.kind, self.pid)
        } else {
            write!(f, "{} {} {}", self.kind, self.pid, self.uid)
        }
    }
}

///
/// StatusItem
///
/// The staged view of one paper's submission status. `outcome` rides along
/// read-only: the status kind needs decision state for the accepted-count
/// aggregate, and loading it here keeps that dependency explicit.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusItem {
    pub time_submitted: i64,
    pub time_withdrawn: i64,
    pub reason: Option<String>,
    pub outcome: i32,
}

impl StatusItem {
    /// Same encoding rule as `Paper::state`, applied to staged fields.
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

    #[must_use]
    pub const fn counts_as_accepted(&self) -> bool {
        self.outcome > 0 && self.time_submitted > 0 && self.time_withdrawn == 0
    }
}

///
/// ItemValue
///
/// Tagged per-kind staged value. Kind-specific fields stay behind the
/// variant; generic store operations only see the key.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ItemValue {
    Conflict(ConflictType),
    Review(Review),
    Status(StatusItem),
}

impl ItemValue {
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        match self {
            Self::Conflict(_) => ItemKind::Conflict,
            Self::Review(_) => ItemKind::Review,
            Self::Status(_) => ItemKind::Status,
        }
    }

    #[must_use]
    pub const fn as_conflict(&self) -> Option<&ConflictType> {
        match self {
            Self::Conflict(ct) => Some(ct),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_review(&self) -> Option<&Review> {
        match self {
            Self::Review(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_status(&self) -> Option<&StatusItem> {
        match self {
            Self::Status(s) => Some(s),
            _ => None,
        }
    }
}

///
/// StagedItem
///
/// `before` is the first-seen durable value and survives any number of
/// mutations; `after` is the current staged value. `None` on either side
/// means "row absent".
///

#[derive(Clone, Debug)]
pub struct StagedItem {
    pub key: ItemKey,
    pub before: Option<ItemValue>,
    pub after: Option<ItemValue>,
    /// Location of the last row that mutated this item.
    pub landmark: Landmark,
    /// Sticky: set once any mutating row carried the override flag.
    pub override_conflict: bool,
}

impl StagedItem {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ordering_clusters_kind_then_paper() {
        let a = ItemKey::conflict(PaperId(2), UserId(9));
        let b = ItemKey::review(PaperId(1), UserId(1));
        let c = ItemKey::review(PaperId(1), UserId(2));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn value_kind_matches_variant() {
        assert_eq!(ItemValue::Conflict(ConflictType::NONE).kind(), ItemKind::Conflict);
        assert_eq!(
            ItemValue::Status(StatusItem {
                time_submitted: 0,
                time_withdrawn: 0,
                reason: None,
                outcome: 0,
            })
            .kind(),
            ItemKind::Status
        );
    }
}
