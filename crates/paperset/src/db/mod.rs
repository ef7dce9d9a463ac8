//! Durable conference state and the write path.
//!
//! The engine validates against staged state; only `Txn` touches the
//! durable tables, and only under a declared lock set. Writes are buffered
//! and applied atomically by `commit`; dropping an uncommitted `Txn`
//! aborts with no partial effects.

use crate::{
    error::InternalError,
    model::{ConferenceSettings, ConflictType, Paper, PaperId, Review, User, UserId},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

///
/// Table
///
/// Lock granularity is the durable table. Ordering is the lock acquisition
/// order, kept stable so merged lock sets are deterministic.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Table {
    Papers,
    Users,
    Reviews,
    Conflicts,
    Tags,
    Settings,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Papers => "papers",
            Self::Users => "users",
            Self::Reviews => "reviews",
            Self::Conflicts => "conflicts",
            Self::Tags => "tags",
            Self::Settings => "settings",
        };
        write!(f, "{label}")
    }
}

///
/// LockSet
///
/// Idempotent union of tables a batch will write. Requesting the same
/// table twice is harmless.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LockSet(BTreeSet<Table>);

impl LockSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, table: Table) {
        self.0.insert(table);
    }

    #[must_use]
    pub fn contains(&self, table: Table) -> bool {
        self.0.contains(&table)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Table> + '_ {
        self.0.iter().copied()
    }
}

///
/// AggregateKind
///
/// Deferred, deduplicated post-commit recomputations. Each contributor
/// registers the paper it touched; the recompute runs once per kind with
/// the extremal contributor span available for range-limited backends.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum AggregateKind {
    AcceptedCount,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AggregateSpan {
    pub min: PaperId,
    pub max: PaperId,
}

///
/// ConferenceDb
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConferenceDb {
    papers: BTreeMap<PaperId, Paper>,
    users: BTreeMap<UserId, User>,
    reviews: BTreeMap<(PaperId, UserId), Review>,
    conflicts: BTreeMap<(PaperId, UserId), ConflictType>,
    tags: BTreeMap<(PaperId, String), f64>,
    settings: ConferenceSettings,
}

impl ConferenceDb {
    #[must_use]
    pub fn new(settings: ConferenceSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    //
    // Reads
    //

    #[must_use]
    pub fn paper(&self, pid: PaperId) -> Option<&Paper> {
        self.papers.get(&pid)
    }

    pub fn papers(&self) -> impl Iterator<Item = &Paper> {
        self.papers.values()
    }

    #[must_use]
    pub fn user(&self, uid: UserId) -> Option<&User> {
        self.users.get(&uid)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    #[must_use]
    pub fn review(&self, pid: PaperId, uid: UserId) -> Option<&Review> {
        self.reviews.get(&(pid, uid))
    }

    pub fn reviews(&self) -> impl Iterator<Item = (PaperId, UserId, &Review)> {
        self.reviews.iter().map(|((p, u), r)| (*p, *u, r))
    }

    #[must_use]
    pub fn conflict(&self, pid: PaperId, uid: UserId) -> ConflictType {
        self.conflicts
            .get(&(pid, uid))
            .copied()
            .unwrap_or(ConflictType::NONE)
    }

    pub fn conflicts(&self) -> impl Iterator<Item = (PaperId, UserId, ConflictType)> + '_ {
        self.conflicts.iter().map(|((p, u), ct)| (*p, *u, *ct))
    }

    #[must_use]
    pub fn tag(&self, pid: PaperId, tag: &str) -> Option<f64> {
        self.tags.get(&(pid, tag.to_string())).copied()
    }

    pub fn tags_for_paper(&self, pid: PaperId) -> impl Iterator<Item = (&str, f64)> {
        self.tags
            .range((pid, String::new())..(PaperId(pid.0 + 1), String::new()))
            .map(|((_, tag), value)| (tag.as_str(), *value))
    }

    #[must_use]
    pub const fn settings(&self) -> &ConferenceSettings {
        &self.settings
    }

    /// Next free user id, for roster-side synthetic identities.
    #[must_use]
    pub fn next_user_id(&self) -> UserId {
        UserId(self.users.keys().last().map_or(0, |u| u.0) + 1)
    }

    //
    // Fixture/setup writes (outside the batch write path)
    //

    pub fn add_paper(&mut self, paper: Paper) {
        self.papers.insert(paper.id, paper);
    }

    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn add_review(&mut self, pid: PaperId, uid: UserId, review: Review) {
        self.reviews.insert((pid, uid), review);
    }

    pub fn add_conflict(&mut self, pid: PaperId, uid: UserId, ct: ConflictType) {
        self.conflicts.insert((pid, uid), ct);
    }

    pub fn set_tag(&mut self, pid: PaperId, tag: impl Into<String>, value: f64) {
        self.tags.insert((pid, tag.into()), value);
    }

    pub fn settings_mut(&mut self) -> &mut ConferenceSettings {
        &mut self.settings
    }

    //
    // Transactions
    //

    /// Acquire the declared locks and open a buffered transaction.
    /// Exclusivity across requests is the embedder's durable-store concern;
    /// within the process the `&mut` receiver is the exclusion.
    pub fn transaction(&mut self, locks: LockSet) -> Txn<'_> {
        Txn {
            db: self,
            locks,
            ops: Vec::new(),
            aggregates: BTreeMap::new(),
        }
    }

    /// Recompute one durable aggregate from scratch.
    pub fn recompute_aggregate(&mut self, kind: AggregateKind) {
        match kind {
            AggregateKind::AcceptedCount => {
                self.settings.accepted_count =
                    self.papers.values().filter(|p| p.counts_as_accepted()).count() as u64;
            }
        }
    }
}

///
/// WriteOp
///

#[derive(Clone, Debug)]
enum WriteOp {
    PutReview {
        pid: PaperId,
        uid: UserId,
        review: Review,
    },
    DeleteReview {
        pid: PaperId,
        uid: UserId,
    },
    PutConflict {
        pid: PaperId,
        uid: UserId,
        ct: ConflictType,
    },
    PutUser {
        user: User,
    },
    SetPaperStatus {
        pid: PaperId,
        time_submitted: i64,
        time_withdrawn: i64,
        reason: Option<String>,
    },
    SetTag {
        pid: PaperId,
        tag: String,
        value: f64,
    },
}

///
/// Txn
///
/// Buffered writes under a declared lock set. Every write method validates
/// its target eagerly; `apply` is then infallible, so a failed batch never
/// leaves partial durable effects.
///

pub struct Txn<'a> {
    db: &'a mut ConferenceDb,
    locks: LockSet,
    ops: Vec<WriteOp>,
    aggregates: BTreeMap<AggregateKind, AggregateSpan>,
}

impl Txn<'_> {
    fn require_lock(&self, table: Table) -> Result<(), InternalError> {
        if self.locks.contains(table) {
            Ok(())
        } else {
            Err(InternalError::db_invariant(format!(
                "write to table '{table}' outside the declared lock set"
            )))
        }
    }

    fn require_paper(&self, pid: PaperId) -> Result<(), InternalError> {
        if self.db.papers.contains_key(&pid) {
            Ok(())
        } else {
            Err(InternalError::db_not_found(format!("paper {pid} does not exist")))
        }
    }

    fn user_will_exist(&self, uid: UserId) -> bool {
        self.db.users.contains_key(&uid)
            || self
                .ops
                .iter()
                .any(|op| matches!(op, WriteOp::PutUser { user } if user.id == uid))
    }

    pub fn put_user(&mut self, user: User) -> Result<(), InternalError> {
        self.require_lock(Table::Users)?;
        self.ops.push(WriteOp::PutUser { user });
        Ok(())
    }

    pub fn put_review(&mut self, pid: PaperId, uid: UserId, review: Review) -> Result<(), InternalError> {
        self.require_lock(Table::Reviews)?;
        self.require_paper(pid)?;
        if !self.user_will_exist(uid) {
            return Err(InternalError::db_not_found(format!(
                "review subject {uid} does not exist"
            )));
        }
        self.ops.push(WriteOp::PutReview { pid, uid, review });
        Ok(())
    }

    pub fn delete_review(&mut self, pid: PaperId, uid: UserId) -> Result<(), InternalError> {
        self.require_lock(Table::Reviews)?;
        self.require_paper(pid)?;
        self.ops.push(WriteOp::DeleteReview { pid, uid });
        Ok(())
    }

    /// An empty conflict type deletes the row.
    pub fn put_conflict(&mut self, pid: PaperId, uid: UserId, ct: ConflictType) -> Result<(), InternalError> {
        self.require_lock(Table::Conflicts)?;
        self.require_paper(pid)?;
        self.ops.push(WriteOp::PutConflict { pid, uid, ct });
        Ok(())
    }

    pub fn set_paper_status(
        &mut self,
        pid: PaperId,
        time_submitted: i64,
        time_withdrawn: i64,
        reason: Option<String>,
    ) -> Result<(), InternalError> {
        self.require_lock(Table::Papers)?;
        self.require_paper(pid)?;
        self.ops.push(WriteOp::SetPaperStatus {
            pid,
            time_submitted,
            time_withdrawn,
            reason,
        });
        Ok(())
    }

    pub fn set_tag(&mut self, pid: PaperId, tag: impl Into<String>, value: f64) -> Result<(), InternalError> {
        self.require_lock(Table::Tags)?;
        self.require_paper(pid)?;
        self.ops.push(WriteOp::SetTag {
            pid,
            tag: tag.into(),
            value,
        });
        Ok(())
    }

    /// Register a deferred aggregate recompute. Duplicate registrations
    /// collapse, widening the contributor span.
    pub fn register_aggregate(&mut self, kind: AggregateKind, pid: PaperId) {
        self.aggregates
            .entry(kind)
            .and_modify(|span| {
                span.min = span.min.min(pid);
                span.max = span.max.max(pid);
            })
            .or_insert(AggregateSpan { min: pid, max: pid });
    }

    /// Apply every buffered write. Infallible by construction: all targets
    /// were validated when buffered.
    pub fn commit(self) -> Vec<(AggregateKind, AggregateSpan)> {
        for op in self.ops {
            match op {
                WriteOp::PutReview { pid, uid, review } => {
                    self.db.reviews.insert((pid, uid), review);
                }
                WriteOp::DeleteReview { pid, uid } => {
                    self.db.reviews.remove(&(pid, uid));
                }
                WriteOp::PutConflict { pid, uid, ct } => {
                    if ct.is_empty() {
                        self.db.conflicts.remove(&(pid, uid));
                    } else {
                        self.db.conflicts.insert((pid, uid), ct);
                    }
                }
                WriteOp::PutUser { user } => {
                    self.db.users.insert(user.id, user);
                }
                WriteOp::SetPaperStatus {
                    pid,
                    time_submitted,
                    time_withdrawn,
                    reason,
                } => {
                    if let Some(paper) = self.db.papers.get_mut(&pid) {
                        paper.time_submitted = time_submitted;
                        paper.time_withdrawn = time_withdrawn;
                        paper.withdraw_reason = reason;
                    }
                }
                WriteOp::SetTag { pid, tag, value } => {
                    self.db.tags.insert((pid, tag), value);
                }
            }
        }
        self.aggregates.into_iter().collect()
    }
}

///
/// TESTS
///
