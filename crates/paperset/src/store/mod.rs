//! The Staged Relation Store.
//!
//! One store exists per batch. It tracks every staged item with its
//! first-seen durable value, so diffing and CSV round-tripping compare the
//! original against the final value no matter how many intermediate
//! mutations occurred. Mutation goes through `stage`; there are no raw
//! remove/add primitives, so the duplicate-insert footgun does not exist.

pub mod item;

pub use item::{ItemKey, ItemKind, ItemValue, StagedItem, StatusItem};

use crate::{
    db::ConferenceDb,
    error::InternalError,
    message::Landmark,
    model::{ConferenceSettings, Now, Paper, PaperId, User, UserId},
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use thiserror::Error as ThisError;

///
/// Reject
///
/// An expected validation failure: blocks one (paper, user) mutation and
/// becomes an error-severity row message. Never fatal to the batch.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{0}")]
pub struct Reject(pub String);

impl Reject {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

///
/// StageError
///

#[derive(Debug, ThisError)]
pub enum StageError {
    #[error(transparent)]
    Reject(#[from] Reject),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

///
/// Finisher
///
/// Named post-processing passes, run once in registration order after all
/// rows are staged and before changes are built. They see the final staged
/// state, which is the only state some effects are correct against.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Finisher {
    /// Conflict gating for newly assigned or escalated reviews.
    CheckReviewConflicts,
    /// Clear vote tags on a paper that ends the batch withdrawn.
    ClearVoteTags { pid: PaperId },
}

///
/// AssignmentStore
///

pub struct AssignmentStore {
    now: Now,
    settings: ConferenceSettings,
    papers: BTreeMap<PaperId, Paper>,
    tags: BTreeMap<(PaperId, String), f64>,

    roster: BTreeMap<UserId, User>,
    email_index: BTreeMap<String, UserId>,
    created_users: BTreeSet<UserId>,
    next_user_id: UserId,
    anonymous_seq: u32,

    items: BTreeMap<ItemKey, StagedItem>,
    loaded: BTreeSet<ItemKind>,
    finishers: Vec<Finisher>,
}

impl AssignmentStore {
    #[must_use]
    pub fn new(db: &ConferenceDb, now: Now) -> Self {
        let papers: BTreeMap<_, _> = db.papers().map(|p| (p.id, p.clone())).collect();
        let roster: BTreeMap<_, _> = db.users().map(|u| (u.id, u.clone())).collect();
        let email_index = roster
            .values()
            .map(|u| (u.email.to_ascii_lowercase(), u.id))
            .collect();
        let tags = papers
            .keys()
            .flat_map(|pid| {
                db.tags_for_paper(*pid)
                    .map(|(tag, value)| ((*pid, tag.to_string()), value))
            })
            .collect();

        Self {
            now,
            settings: db.settings().clone(),
            papers,
            tags,
            roster,
            email_index,
            created_users: BTreeSet::new(),
            next_user_id: db.next_user_id(),
            anonymous_seq: 0,
            items: BTreeMap::new(),
            loaded: BTreeSet::new(),
            finishers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn now(&self) -> Now {
        self.now
    }

    #[must_use]
    pub const fn settings(&self) -> &ConferenceSettings {
        &self.settings
    }

    //
    // Paper working set
    //

    #[must_use]
    pub fn paper(&self, pid: PaperId) -> Option<&Paper> {
        self.papers.get(&pid)
    }

    pub fn prows(&self) -> impl Iterator<Item = &Paper> {
        self.papers.values()
    }

    #[must_use]
    pub fn paper_ids(&self) -> Vec<PaperId> {
        self.papers.keys().copied().collect()
    }

    /// Nonzero vote-tag values on a paper, by full tag name (`uid~base`).
    #[must_use]
    pub fn vote_tags_for_paper(&self, pid: PaperId) -> Vec<(String, f64)> {
        self.tags
            .range((pid, String::new())..(PaperId(pid.0 + 1), String::new()))
            .filter(|((_, tag), value)| {
                **value != 0.0
                    && tag
                        .split_once('~')
                        .is_some_and(|(_, base)| self.settings.is_vote_tag(base))
            })
            .map(|((_, tag), value)| (tag.clone(), *value))
            .collect()
    }

    //
    // User roster
    //

    #[must_use]
    pub fn user(&self, uid: UserId) -> Option<&User> {
        self.roster.get(&uid)
    }

    #[must_use]
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.email_index
            .get(&email.to_ascii_lowercase())
            .and_then(|uid| self.roster.get(uid))
    }

    pub fn pc_members(&self) -> impl Iterator<Item = &User> {
        self.roster.values().filter(|u| u.pc_member && !u.disabled)
    }

    /// Whether this user record was created during the current batch and
    /// still needs a durable write.
    #[must_use]
    pub fn user_is_created(&self, uid: UserId) -> bool {
        self.created_users.contains(&uid)
    }

    /// Create a roster entry for a not-yet-known external reviewer.
    pub fn create_external_user(&mut self, email: &str) -> UserId {
        let uid = self.alloc_user_id();
        let user = User::new(uid, email, "");
        self.email_index.insert(email.to_ascii_lowercase(), uid);
        self.roster.insert(uid, user);
        self.created_users.insert(uid);
        uid
    }

    /// Synthesize a fresh anonymous reviewer identity.
    pub fn create_anonymous_user(&mut self) -> UserId {
        loop {
            self.anonymous_seq += 1;
            let email = format!("anonymous{}@conference.example", self.anonymous_seq);
            if self.email_index.contains_key(&email) {
                continue;
            }
            let uid = self.alloc_user_id();
            let mut user = User::new(uid, email.clone(), format!("Anonymous {}", self.anonymous_seq));
            user.anonymous = true;
            self.email_index.insert(email, uid);
            self.roster.insert(uid, user);
            self.created_users.insert(uid);
            return uid;
        }
    }

    fn alloc_user_id(&mut self) -> UserId {
        let uid = self.next_user_id;
        self.next_user_id = UserId(uid.0 + 1);
        uid
    }

    //
    // Staged items
    //

    /// Record that a kind's bulk loader is about to run. Returns `false`
    /// when it already ran, so repeated references stay single-load.
    pub fn mark_kind_loaded(&mut self, kind: ItemKind) -> bool {
        self.loaded.insert(kind)
    }

    /// Insert an item representing durable state (`before == after`).
    pub fn load(&mut self, key: ItemKey, value: ItemValue) -> Result<(), InternalError> {
        if value.kind() != key.kind {
            return Err(InternalError::store_invariant(format!(
                "loaded value kind mismatch for item {key}"
            )));
        }
        if self.items.contains_key(&key) {
            return Err(InternalError::store_invariant(format!(
                "duplicate load for item {key}"
            )));
        }
        self.items.insert(
            key,
            StagedItem {
                key,
                before: Some(value.clone()),
                after: Some(value),
                landmark: Landmark::default(),
                override_conflict: false,
            },
        );
        Ok(())
    }

    /// Copy-on-write mutation: the mutator sees the current staged value
    /// and returns the next one (`None` deletes the row). The first-seen
    /// original is preserved across any number of calls. Returns whether
    /// the staged value actually changed.
    pub fn stage<F>(
        &mut self,
        key: ItemKey,
        landmark: &Landmark,
        override_conflict: bool,
        mutate: F,
    ) -> Result<bool, StageError>
    where
        F: FnOnce(Option<&ItemValue>) -> Result<Option<ItemValue>, Reject>,
    {
        if key.uid.is_none() && key.kind != ItemKind::Status {
            return Err(InternalError::store_invariant(format!(
                "item {key} staged without a subject"
            ))
            .into());
        }
        if !self.loaded.contains(&key.kind) {
            return Err(InternalError::store_invariant(format!(
                "kind '{}' staged before its loader ran",
                key.kind
            ))
            .into());
        }

        let prior = self.items.get(&key);
        let current = prior.and_then(|item| item.after.as_ref());
        let next = mutate(current)?;
        if let Some(value) = &next
            && value.kind() != key.kind
        {
            return Err(InternalError::store_invariant(format!(
                "staged value kind mismatch for item {key}"
            ))
            .into());
        }

        match self.items.get_mut(&key) {
            Some(item) => {
                let changed = item.after != next;
                if changed {
                    item.after = next;
                    item.landmark = landmark.clone();
                }
                item.override_conflict |= override_conflict;
                Ok(changed)
            }
            None => {
                let changed = next.is_some();
                self.items.insert(
                    key,
                    StagedItem {
                        key,
                        before: None,
                        after: next,
                        landmark: landmark.clone(),
                        override_conflict,
                    },
                );
                Ok(changed)
            }
        }
    }

    /// Reset one item's staged value back to its original (finisher use).
    pub fn revert(&mut self, key: &ItemKey) {
        if let Some(item) = self.items.get_mut(key) {
            item.after = item.before.clone();
        }
    }

    #[must_use]
    pub fn item(&self, key: &ItemKey) -> Option<&StagedItem> {
        self.items.get(key)
    }

    /// The current staged value for a key, if the row exists.
    #[must_use]
    pub fn current(&self, key: &ItemKey) -> Option<&ItemValue> {
        self.items.get(key).and_then(|item| item.after.as_ref())
    }

    pub fn items(&self) -> impl Iterator<Item = &StagedItem> {
        self.items.values()
    }

    pub fn items_of_kind(&self, kind: ItemKind) -> impl Iterator<Item = &StagedItem> {
        self.items
            .range(range_for_kind(kind))
            .map(|(_, item)| item)
    }

    pub fn items_for_paper(&self, kind: ItemKind, pid: PaperId) -> impl Iterator<Item = &StagedItem> {
        let lo = ItemKey {
            kind,
            pid,
            uid: UserId::NONE,
        };
        let hi = ItemKey {
            kind,
            pid,
            uid: UserId(u32::MAX),
        };
        self.items.range(lo..=hi).map(|(_, item)| item)
    }

    //
    // Cross-item derived state
    //

    /// Staged contact-author count for a paper, optionally ignoring one
    /// user (the one a mutation is about to drop).
    #[must_use]
    pub fn contact_count(&self, pid: PaperId, excluding: Option<UserId>) -> usize {
        self.items_for_paper(ItemKind::Conflict, pid)
            .filter(|item| Some(item.key.uid) != excluding)
            .filter(|item| {
                item.after
                    .as_ref()
                    .and_then(ItemValue::as_conflict)
                    .is_some_and(|ct| ct.is_contact())
            })
            .count()
    }

    /// Whether a user is (still) a staged contact author of a paper.
    #[must_use]
    pub fn is_contact(&self, pid: PaperId, uid: UserId) -> bool {
        self.current(&ItemKey::conflict(pid, uid))
            .and_then(ItemValue::as_conflict)
            .is_some_and(|ct| ct.is_contact())
    }

    //
    // Finishers
    //

    /// Register a named finisher pass; duplicates collapse.
    pub fn register_finisher(&mut self, finisher: Finisher) {
        if !self.finishers.contains(&finisher) {
            self.finishers.push(finisher);
        }
    }

    #[must_use]
    pub fn finishers(&self) -> Vec<Finisher> {
        self.finishers.clone()
    }
}

fn range_for_kind(kind: ItemKind) -> (Bound<ItemKey>, Bound<ItemKey>) {
    let lo = ItemKey {
        kind,
        pid: PaperId(0),
        uid: UserId::NONE,
    };
    let hi = ItemKey {
        kind,
        pid: PaperId(u32::MAX),
        uid: UserId(u32::MAX),
    };
    (Bound::Included(lo), Bound::Included(hi))
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictType, Review, ReviewType};

    fn store() -> AssignmentStore {
        let mut db = ConferenceDb::default();
        db.add_paper(Paper::new(PaperId(1), "one"));
        db.add_user(User::new(UserId(2), "a@x.org", "Alice").pc());
        AssignmentStore::new(&db, Now(1000))
    }

    fn review_value(rtype: ReviewType) -> ItemValue {
        ItemValue::Review(Review::fresh(rtype, ""))
    }

    #[test]
    fn stage_requires_the_loader_to_have_run() {
        let mut store = store();
        let lm = Landmark::new("s", 1);
        let err = store
            .stage(ItemKey::review(PaperId(1), UserId(2)), &lm, false, |_| {
                Ok(Some(review_value(ReviewType::Primary)))
            })
            .unwrap_err();
        assert!(matches!(err, StageError::Internal(_)));
    }

    #[test]
    fn duplicate_load_is_a_representation_error() {
        let mut store = store();
        let key = ItemKey::conflict(PaperId(1), UserId(2));
        store.load(key, ItemValue::Conflict(ConflictType::OTHER)).unwrap();
        assert!(store.load(key, ItemValue::Conflict(ConflictType::OTHER)).is_err());
    }

    #[test]
    fn stage_preserves_the_first_seen_original() {
        let mut store = store();
        let key = ItemKey::review(PaperId(1), UserId(2));
        let lm = Landmark::new("s", 1);

        store.mark_kind_loaded(ItemKind::Review);
        store.load(key, review_value(ReviewType::Secondary)).unwrap();

        store
            .stage(key, &lm, false, |_| Ok(Some(review_value(ReviewType::Primary))))
            .unwrap();
        store
            .stage(key, &lm, false, |_| Ok(Some(review_value(ReviewType::Meta))))
            .unwrap();

        let item = store.item(&key).unwrap();
        assert_eq!(item.before, Some(review_value(ReviewType::Secondary)));
        assert_eq!(item.after, Some(review_value(ReviewType::Meta)));
    }

    #[test]
    fn stage_reports_no_change_for_identity_mutations() {
        let mut store = store();
        let key = ItemKey::conflict(PaperId(1), UserId(2));
        let lm = Landmark::new("s", 1);

        store.mark_kind_loaded(ItemKind::Conflict);
        store.load(key, ItemValue::Conflict(ConflictType::OTHER)).unwrap();

        let changed = store
            .stage(key, &lm, false, |cur| Ok(cur.cloned()))
            .unwrap();
        assert!(!changed);
        assert!(!store.item(&key).unwrap().changed());
    }

    #[test]
    fn stage_rejects_kind_mismatch() {
        let mut store = store();
        store.mark_kind_loaded(ItemKind::Conflict);
        let lm = Landmark::new("s", 1);
        let err = store
            .stage(ItemKey::conflict(PaperId(1), UserId(2)), &lm, false, |_| {
                Ok(Some(review_value(ReviewType::Primary)))
            })
            .unwrap_err();
        assert!(matches!(err, StageError::Internal(_)));
    }

    #[test]
    fn subjectless_stage_is_only_valid_for_status() {
        let mut store = store();
        store.mark_kind_loaded(ItemKind::Conflict);
        let lm = Landmark::new("s", 1);
        let err = store
            .stage(
                ItemKey::conflict(PaperId(1), UserId::NONE),
                &lm,
                false,
                |_| Ok(None),
            )
            .unwrap_err();
        assert!(matches!(err, StageError::Internal(_)));
    }

    #[test]
    fn contact_count_sees_staged_state_not_durable_state() {
        let mut db = ConferenceDb::default();
        db.add_paper(Paper::new(PaperId(1), "one"));
        db.add_user(User::new(UserId(2), "a@x.org", "Alice"));
        db.add_user(User::new(UserId(3), "b@x.org", "Bob"));
        db.add_conflict(
            PaperId(1),
            UserId(2),
            ConflictType::AUTHOR.insert(ConflictType::CONTACT),
        );
        let mut store = AssignmentStore::new(&db, Now(1000));

        store.mark_kind_loaded(ItemKind::Conflict);
        store
            .load(
                ItemKey::conflict(PaperId(1), UserId(2)),
                ItemValue::Conflict(ConflictType::AUTHOR.insert(ConflictType::CONTACT)),
            )
            .unwrap();

        assert_eq!(store.contact_count(PaperId(1), None), 1);

        // Stage a second contact; the count follows the staged state.
        let lm = Landmark::new("s", 1);
        store
            .stage(ItemKey::conflict(PaperId(1), UserId(3)), &lm, false, |_| {
                Ok(Some(ItemValue::Conflict(ConflictType::CONTACT)))
            })
            .unwrap();
        assert_eq!(store.contact_count(PaperId(1), None), 2);
        assert_eq!(store.contact_count(PaperId(1), Some(UserId(2))), 1);
    }

    #[test]
    fn anonymous_identities_are_fresh_and_flagged() {
        let mut store = store();
        let a = store.create_anonymous_user();
        let b = store.create_anonymous_user();
        assert_ne!(a, b);
        assert!(store.user(a).unwrap().anonymous);
        assert!(store.user_is_created(a));
        assert!(store.user_by_email("anonymous1@conference.example").is_some());
    }

    #[test]
    fn finisher_registration_deduplicates_in_order() {
        let mut store = store();
        store.register_finisher(Finisher::ClearVoteTags { pid: PaperId(1) });
        store.register_finisher(Finisher::CheckReviewConflicts);
        store.register_finisher(Finisher::ClearVoteTags { pid: PaperId(1) });
        assert_eq!(
            store.finishers(),
            vec![
                Finisher::ClearVoteTags { pid: PaperId(1) },
                Finisher::CheckReviewConflicts,
            ]
        );
    }
}
