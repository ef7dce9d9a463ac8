//! The batch orchestrator.
//!
//! An `AssignmentSet` runs one batch: rows are applied against the staged
//! store, finishers run once, change objects are built, and `execute`
//! commits everything in one transaction. Everything before `execute` is
//! side-effect free, so validation doubles as a dry run whose diff and
//! messages match a real execute exactly.

pub mod row;
pub mod selector;

pub use row::RowSpec;
pub use selector::{NoSearcher, PaperSearcher};

use crate::{
    change::{self, Change, Effects, Mailer},
    csv::{self, DiffExport},
    db::{ConferenceDb, LockSet},
    error::InternalError,
    kind::{KindRegistry, MutationKind, UserUniverse, review},
    message::{Landmark, MessageSet},
    model::{Actor, Now, PaperId, UserId},
    obs::{self, BatchEvent},
    store::{AssignmentStore, Finisher, StageError},
};

enum UserSel {
    Missing,
    Any,
    Anonymous,
    Email(String),
}

impl UserSel {
    fn parse(user: Option<&str>) -> Self {
        let Some(token) = user.map(str::trim).filter(|t| !t.is_empty()) else {
            return Self::Missing;
        };
        match token.to_ascii_lowercase().as_str() {
            "any" | "all" => Self::Any,
            "anonymous" | "anonymous-new" => Self::Anonymous,
            _ => Self::Email(token.to_string()),
        }
    }
}

///
/// AssignmentSet
///

pub struct AssignmentSet {
    actor: Actor,
    store: AssignmentStore,
    registry: KindRegistry,
    searcher: Box<dyn PaperSearcher>,
    messages: MessageSet,
    changes: Option<Vec<Box<dyn Change>>>,
}

impl AssignmentSet {
    #[must_use]
    pub fn new(db: &ConferenceDb, actor: Actor, now: Now) -> Self {
        Self {
            actor,
            store: AssignmentStore::new(db, now),
            registry: KindRegistry::standard(),
            searcher: Box::new(NoSearcher),
            messages: MessageSet::new(),
            changes: None,
        }
    }

    #[must_use]
    pub fn with_searcher(mut self, searcher: Box<dyn PaperSearcher>) -> Self {
        self.searcher = searcher;
        self
    }

    #[must_use]
    pub const fn messages(&self) -> &MessageSet {
        &self.messages
    }

    #[must_use]
    pub const fn store(&self) -> &AssignmentStore {
        &self.store
    }

    /// Parse a request sheet and apply every row in order.
    pub fn apply_sheet(
        &mut self,
        db: &ConferenceDb,
        input: &str,
        file: &str,
    ) -> Result<(), InternalError> {
        for row in csv::parse_rows(input, file)? {
            self.apply(db, &row)?;
        }
        Ok(())
    }

    /// Apply one row. Validation failures become row messages; only
    /// representation errors propagate.
    pub fn apply(&mut self, db: &ConferenceDb, row: &RowSpec) -> Result<(), InternalError> {
        if self.changes.is_some() {
            return Err(InternalError::batch_invariant(
                "row applied after the batch was finished",
            ));
        }

        let Some(kind) = self.registry.get(&row.action) else {
            self.messages.error(
                &row.landmark,
                format!(
                    "unknown action '{}' (expected one of: {})",
                    row.action.trim(),
                    self.registry.actions().join(", ")
                ),
            );
            return Ok(());
        };
        kind.load_state(db, &mut self.store)?;

        let papers = match selector::resolve_papers(&row.paper, &self.store, &*self.searcher) {
            Ok(papers) => papers,
            Err(reject) => {
                self.messages.error(&row.landmark, reject.0);
                return Ok(());
            }
        };

        let sel = UserSel::parse(row.user.as_deref());
        for pid in papers {
            if let Err(reject) = kind.allow_paper(pid, &self.actor, &self.store) {
                self.messages.error(&row.landmark, reject.0);
                continue;
            }
            let uids = match resolve_users(&mut self.store, kind, pid, &sel, row) {
                Ok(uids) => uids,
                Err(reject) => {
                    self.messages.error(&row.landmark, reject.0);
                    continue;
                }
            };
            for uid in uids {
                if let Err(reject) = kind.allow_user(pid, uid, row, &self.actor, &self.store) {
                    self.messages.error(&row.landmark, reject.0);
                    continue;
                }
                match kind.apply(pid, uid, row, &self.actor, &mut self.store, &mut self.messages) {
                    Ok(()) => {
                        obs::emit(BatchEvent::RowApplied {
                            kind: kind.item_kind(),
                            staged: true,
                        });
                    }
                    Err(StageError::Reject(reject)) => {
                        self.messages.error(&row.landmark, reject.0);
                        obs::emit(BatchEvent::RowApplied {
                            kind: kind.item_kind(),
                            staged: false,
                        });
                    }
                    Err(StageError::Internal(err)) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Run registered finishers against the final staged state and build
    /// the change set. Idempotent; `apply` is refused afterwards.
    pub fn finish(&mut self) -> Result<(), InternalError> {
        if self.changes.is_some() {
            return Ok(());
        }
        for finisher in self.store.finishers() {
            match finisher {
                Finisher::CheckReviewConflicts => {
                    review::check_unconflicted(&mut self.store, &self.actor, &mut self.messages);
                }
                // Evaluated when changes are built, against final state.
                Finisher::ClearVoteTags { .. } => {}
            }
        }
        self.changes = Some(change::build_changes(&self.store)?);
        Ok(())
    }

    /// The built change set; empty before `finish`.
    #[must_use]
    pub fn changes(&self) -> &[Box<dyn Change>] {
        self.changes.as_deref().unwrap_or_default()
    }

    /// Render the whole diff as a replayable request sheet.
    pub fn diff_csv(&mut self) -> Result<String, InternalError> {
        self.finish()?;
        let mut out = DiffExport::new();
        for change in self.changes() {
            change.describe_csv(&mut out);
        }
        out.to_csv()
    }

    /// One markup line per change object.
    pub fn describe_markup(&mut self) -> Result<Vec<String>, InternalError> {
        self.finish()?;
        Ok(self
            .changes()
            .iter()
            .map(|c| c.describe_markup())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Execute the batch: one transaction under the merged lock set, full
    /// commit or no durable effect at all. Returns whether it committed;
    /// error-level messages make this a no-op returning `false`.
    pub fn execute(
        &mut self,
        db: &mut ConferenceDb,
        mailer: &mut dyn Mailer,
    ) -> Result<bool, InternalError> {
        self.finish()?;
        if self.messages.has_error() {
            obs::emit(BatchEvent::ExecuteFinish { committed: false });
            return Ok(false);
        }

        let changes = self.changes.as_deref().unwrap_or_default();
        let mut locks = LockSet::new();
        for change in changes {
            change.add_locks(&mut locks);
        }
        obs::emit(BatchEvent::ExecuteStart {
            changes: changes.len(),
            locks: locks.len(),
        });

        let mut txn = db.transaction(locks);
        let mut effects = Effects::default();
        for change in changes {
            if let Err(err) = change.execute(&mut txn) {
                // Dropping the transaction aborts it; no partial writes.
                drop(txn);
                self.messages
                    .error(&Landmark::default(), err.display_with_class());
                obs::emit(BatchEvent::ExecuteFinish { committed: false });
                return Ok(false);
            }
            change.cleanup(&mut effects);
        }
        let aggregates = txn.commit();

        // Post-commit only: these must never fire for an aborted batch.
        effects.dispatch(mailer);
        for (kind, _span) in aggregates {
            db.recompute_aggregate(kind);
        }
        obs::emit(BatchEvent::ExecuteFinish { committed: true });
        Ok(true)
    }
}

fn resolve_users(
    store: &mut AssignmentStore,
    kind: &dyn MutationKind,
    pid: PaperId,
    sel: &UserSel,
    row: &RowSpec,
) -> Result<Vec<UserId>, crate::store::Reject> {
    use crate::store::Reject;

    match sel {
        UserSel::Missing => match kind.expand_missing_user(pid, row, store)? {
            Some(uids) => Ok(uids),
            None => Err(Reject::new("user required for this action")),
        },
        UserSel::Any => {
            if let Some(uids) = kind.expand_any_user(pid, row, store)? {
                return Ok(uids);
            }
            match kind.user_universe(row) {
                UserUniverse::Pc | UserUniverse::Reviewers => {
                    Ok(store.pc_members().map(|u| u.id).collect())
                }
                UserUniverse::Any => Err(Reject::new("user required for this action")),
            }
        }
        UserSel::Anonymous => {
            if kind.may_create_users() {
                Ok(vec![store.create_anonymous_user()])
            } else {
                Err(Reject::new("anonymous users are not valid for this action"))
            }
        }
        UserSel::Email(email) => {
            if let Some(user) = store.user_by_email(email) {
                return Ok(vec![user.id]);
            }
            if kind.may_create_users() {
                if email.contains('@') {
                    Ok(vec![store.create_external_user(email)])
                } else {
                    Err(Reject::new(format!("invalid email '{email}'")))
                }
            } else {
                Err(Reject::new(format!("unknown user {email}")))
            }
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        change::NoMailer,
        model::{ConferenceSettings, ConflictType, Paper, ReviewType, User},
        store::{ItemKey, ItemValue},
    };

    fn db() -> ConferenceDb {
        let mut db = ConferenceDb::new(ConferenceSettings {
            rounds: vec!["R1".to_string()],
            ..ConferenceSettings::default()
        });
        for id in 1..=3 {
            let mut paper = Paper::new(PaperId(id), format!("paper {id}"));
            paper.time_submitted = 100;
            db.add_paper(paper);
        }
        db.add_user(User::new(UserId(1), "chair@x.org", "Chair").chaired());
        db.add_user(User::new(UserId(2), "a@x.org", "Alice").pc());
        db.add_user(User::new(UserId(3), "b@x.org", "Bob").pc());
        db
    }

    fn set(db: &ConferenceDb) -> AssignmentSet {
        AssignmentSet::new(db, Actor::chair(UserId(1)), Now(1000))
    }

    #[test]
    fn sheet_rows_stage_and_execute() {
        let mut db = db();
        let mut batch = set(&db);
        let sheet = "action,paper,email,reviewtype,round\n\
                     review,1-2,a@x.org,primary,R1\n\
                     conflict,3,b@x.org,collaborator\n";
        batch.apply_sheet(&db, sheet, "sheet.csv").unwrap();
        assert!(!batch.messages().has_error());

        let committed = batch.execute(&mut db, &mut NoMailer).unwrap();
        assert!(committed);
        assert_eq!(
            db.review(PaperId(1), UserId(2)).unwrap().rtype,
            ReviewType::Primary
        );
        assert!(db.review(PaperId(3), UserId(2)).is_none());
        assert!(db.conflict(PaperId(3), UserId(3)).is_conflicted());
    }

    #[test]
    fn unknown_action_is_a_row_message_not_an_error() {
        let db = db();
        let mut batch = set(&db);
        batch
            .apply(&db, &RowSpec::new("decide").paper("1"))
            .unwrap();
        assert!(batch.messages().has_error());
    }

    #[test]
    fn error_messages_block_execute_entirely() {
        let mut db = db();
        let mut batch = set(&db);
        let sheet = "action,paper,email,reviewtype\n\
                     review,1,a@x.org,primary\n\
                     review,9,b@x.org,primary\n";
        batch.apply_sheet(&db, sheet, "s").unwrap();
        assert!(batch.messages().has_error());

        let committed = batch.execute(&mut db, &mut NoMailer).unwrap();
        assert!(!committed);
        assert!(db.review(PaperId(1), UserId(2)).is_none());
    }

    #[test]
    fn unknown_email_creates_an_external_reviewer() {
        let mut db = db();
        let mut batch = set(&db);
        let row = RowSpec::new("review")
            .paper("1")
            .user("newext@y.org")
            .field("reviewtype", "external");
        batch.apply(&db, &row).unwrap();
        assert!(!batch.messages().has_error());

        batch.execute(&mut db, &mut NoMailer).unwrap();
        let created = db.users().find(|u| u.email == "newext@y.org").unwrap();
        assert_eq!(
            db.review(PaperId(1), created.id).unwrap().rtype,
            ReviewType::External
        );
    }

    #[test]
    fn unknown_email_is_rejected_for_conflicts() {
        let db = db();
        let mut batch = set(&db);
        let row = RowSpec::new("conflict").paper("1").user("nobody@y.org");
        batch.apply(&db, &row).unwrap();
        assert!(batch.messages().has_error());
    }

    #[test]
    fn anonymous_token_mints_one_identity_per_paper() {
        let db = db();
        let mut batch = set(&db);
        let row = RowSpec::new("review")
            .paper("1-2")
            .user("anonymous")
            .field("reviewtype", "external");
        batch.apply(&db, &row).unwrap();
        assert!(!batch.messages().has_error());
        batch.finish().unwrap();
        assert_eq!(batch.changes().len(), 2);
    }

    #[test]
    fn later_rows_see_earlier_staged_state() {
        let db = db();
        let mut batch = set(&db);
        // Assign, then remove within the same batch: net zero changes.
        batch
            .apply(
                &db,
                &RowSpec::new("review").paper("1").user("a@x.org").field("reviewtype", "primary"),
            )
            .unwrap();
        batch
            .apply(
                &db,
                &RowSpec::new("review").paper("1").user("a@x.org").field("reviewtype", "none"),
            )
            .unwrap();
        batch.finish().unwrap();
        assert!(batch.changes().is_empty());
    }

    #[test]
    fn conflicted_assignment_is_reverted_by_the_finisher() {
        let mut db = db();
        db.add_conflict(PaperId(1), UserId(2), ConflictType::COLLABORATOR);
        let mut batch = set(&db);
        batch
            .apply(
                &db,
                &RowSpec::new("review").paper("1").user("a@x.org").field("reviewtype", "primary"),
            )
            .unwrap();
        batch.finish().unwrap();
        assert!(batch.messages().has_error());
        assert!(batch.changes().is_empty());
    }

    #[test]
    fn override_downgrades_the_conflict_to_a_warning() {
        let mut db = db();
        db.add_conflict(PaperId(1), UserId(2), ConflictType::COLLABORATOR);
        let mut batch = set(&db);
        batch
            .apply(
                &db,
                &RowSpec::new("review")
                    .paper("1")
                    .user("a@x.org")
                    .field("reviewtype", "primary")
                    .overriding(),
            )
            .unwrap();
        batch.finish().unwrap();
        assert!(!batch.messages().has_error());
        assert_eq!(batch.changes().len(), 1);
    }

    #[test]
    fn apply_after_finish_is_an_invariant_violation() {
        let db = db();
        let mut batch = set(&db);
        batch.finish().unwrap();
        let err = batch
            .apply(&db, &RowSpec::new("submit").paper("1"))
            .unwrap_err();
        assert!(err.message.contains("finished"));
    }

    #[test]
    fn wildcard_user_expands_to_staged_reviewers() {
        let mut db = db();
        let mut rev = crate::model::Review::fresh(ReviewType::Primary, "R1");
        rev.non_draft = true;
        db.add_review(PaperId(1), UserId(2), rev);
        let mut batch = set(&db);
        batch
            .apply(&db, &RowSpec::new("unsubmitreview").paper("1").user("any"))
            .unwrap();
        assert!(!batch.messages().has_error());
        let item = batch
            .store()
            .current(&ItemKey::review(PaperId(1), UserId(2)))
            .and_then(ItemValue::as_review)
            .cloned()
            .unwrap();
        assert!(!item.non_draft);
    }
}
