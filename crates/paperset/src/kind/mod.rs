//! Mutation-kind plugins.
//!
//! Each plugin owns one mutation kind's validation and application logic
//! behind the `MutationKind` contract. The orchestrator never knows kind
//! semantics; it resolves papers and users, then defers to the plugin.

pub mod conflict;
pub mod review;
pub mod status;
pub mod unsubmit_review;

pub use status::StatusAction;

use crate::{
    batch::row::RowSpec,
    db::ConferenceDb,
    error::InternalError,
    message::MessageSet,
    model::{Actor, PaperId, UserId},
    store::{AssignmentStore, ItemKind, Reject, StageError},
};
use std::collections::BTreeMap;

///
/// UserUniverse
///
/// Which pool of users is eligible when a row's user column is a wildcard.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserUniverse {
    Pc,
    Reviewers,
    /// No sensible pool; a wildcard user is an error for this kind.
    Any,
}

///
/// MutationKind
///

pub trait MutationKind {
    /// The staged-state kind this plugin mutates.
    fn item_kind(&self) -> ItemKind;

    /// Ensure this kind's rows (and any kinds it depends on) are loaded.
    fn load_state(&self, db: &ConferenceDb, store: &mut AssignmentStore)
    -> Result<(), InternalError>;

    /// Eligible user pool when the row's user column is a wildcard.
    fn user_universe(&self, row: &RowSpec) -> UserUniverse;

    /// Whether unknown emails and anonymous tokens may mint new accounts.
    fn may_create_users(&self) -> bool {
        false
    }

    /// Expand an explicit `any` user. `Ok(None)` tells the orchestrator to
    /// fall through to the universe pool.
    fn expand_any_user(
        &self,
        pid: PaperId,
        row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject>;

    /// Expand a missing user column. `Ok(None)` means a concrete user is
    /// required and the orchestrator should reject the row.
    fn expand_missing_user(
        &self,
        pid: PaperId,
        row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject>;

    /// May the actor touch this paper for this kind at all?
    fn allow_paper(
        &self,
        pid: PaperId,
        actor: &Actor,
        store: &AssignmentStore,
    ) -> Result<(), Reject>;

    /// May this specific user be the subject?
    fn allow_user(
        &self,
        pid: PaperId,
        uid: UserId,
        row: &RowSpec,
        actor: &Actor,
        store: &AssignmentStore,
    ) -> Result<(), Reject>;

    /// Stage the mutation. Warnings go straight to `messages`; rejections
    /// come back as `StageError::Reject`.
    fn apply(
        &self,
        pid: PaperId,
        uid: UserId,
        row: &RowSpec,
        actor: &Actor,
        store: &mut AssignmentStore,
        messages: &mut MessageSet,
    ) -> Result<(), StageError>;
}

///
/// KindRegistry
///
/// Maps sheet action names to plugin implementations. Built once per
/// batch; the standard table registers the four engine kinds, with the
/// status kind appearing once per action verb.
///

pub struct KindRegistry(BTreeMap<&'static str, Box<dyn MutationKind>>);

impl KindRegistry {
    #[must_use]
    pub fn standard() -> Self {
        let mut table: BTreeMap<&'static str, Box<dyn MutationKind>> = BTreeMap::new();
        table.insert("conflict", Box::new(conflict::ConflictKind));
        table.insert("review", Box::new(review::ReviewKind));
        table.insert(
            "unsubmitreview",
            Box::new(unsubmit_review::UnsubmitReviewKind),
        );
        for action in StatusAction::ALL {
            table.insert(action.verb(), Box::new(status::StatusKind::new(action)));
        }
        Self(table)
    }

    #[must_use]
    pub fn get(&self, action: &str) -> Option<&dyn MutationKind> {
        self.0
            .get(action.trim().to_ascii_lowercase().as_str())
            .map(Box::as_ref)
    }

    #[must_use]
    pub fn actions(&self) -> Vec<&'static str> {
        self.0.keys().copied().collect()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_all_actions() {
        let registry = KindRegistry::standard();
        for action in [
            "conflict",
            "review",
            "unsubmitreview",
            "submit",
            "unsubmit",
            "withdraw",
            "revive",
        ] {
            assert!(registry.get(action).is_some(), "missing action {action}");
        }
        assert!(registry.get("decide").is_none());
    }

    #[test]
    fn action_lookup_ignores_case_and_whitespace() {
        let registry = KindRegistry::standard();
        assert!(registry.get(" Review ").is_some());
    }
}
