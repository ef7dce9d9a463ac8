//! Committed-change objects.
//!
//! One object per net-changed staged item. Each object declares the
//! tables it writes, can describe itself as markup or as replayable diff
//! rows, issues its durable writes into a buffered transaction, and may
//! queue post-commit effects. Preview and execute share this code, so a
//! dry run's diff is exactly what an execute would do.

use crate::{
    csv::{DiffExport, ExportRow},
    db::{AggregateKind, LockSet, Table, Txn},
    error::InternalError,
    kind::status,
    model::{ConflictType, PaperId, Review, User, UserId},
    store::{AssignmentStore, Finisher, ItemKind, ItemValue, StatusItem},
};

///
/// ReviewInvite
///
/// A post-commit notification to an external reviewer.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReviewInvite {
    pub email: String,
    pub pid: PaperId,
    pub title: String,
}

///
/// Mailer
///

pub trait Mailer {
    fn send_review_invite(&mut self, invite: &ReviewInvite);
}

/// Discards every notification; the right mailer for previews and tests.
pub struct NoMailer;

impl Mailer for NoMailer {
    fn send_review_invite(&mut self, _invite: &ReviewInvite) {}
}

///
/// Effects
///
/// Cleanup work queued during execute and dispatched strictly after the
/// transaction commits. An aborted batch drops these unsent.
///

#[derive(Debug, Default)]
pub struct Effects {
    invites: Vec<ReviewInvite>,
}

impl Effects {
    pub fn invite(&mut self, invite: ReviewInvite) {
        self.invites.push(invite);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invites.is_empty()
    }

    pub fn dispatch(self, mailer: &mut dyn Mailer) {
        for invite in &self.invites {
            mailer.send_review_invite(invite);
        }
    }
}

///
/// Change
///

pub trait Change {
    /// Declare the durable tables `execute` will write.
    fn add_locks(&self, locks: &mut LockSet);

    /// Human-readable before/after summary, one line.
    fn describe_markup(&self) -> String;

    /// Append zero or more replayable diff rows.
    fn describe_csv(&self, out: &mut DiffExport);

    /// Buffer the durable writes. Errors here abort the whole batch.
    fn execute(&self, txn: &mut Txn<'_>) -> Result<(), InternalError>;

    /// Queue post-commit effects. Default: none.
    fn cleanup(&self, _effects: &mut Effects) {}
}

/// Build one change object per net-changed item, in store order, then one
/// per pending vote-tag clear. Pure over the store, so preview and execute
/// build identical sets.
pub fn build_changes(store: &AssignmentStore) -> Result<Vec<Box<dyn Change>>, InternalError> {
    let mut changes: Vec<Box<dyn Change>> = Vec::new();

    for item in store.items().filter(|item| item.changed()) {
        match item.key.kind {
            ItemKind::Conflict => {
                let user = roster_user(store, item.key.uid)?;
                changes.push(Box::new(ConflictChange {
                    pid: item.key.pid,
                    user,
                    before: item.before.as_ref().and_then(ItemValue::as_conflict).copied(),
                    after: item.after.as_ref().and_then(ItemValue::as_conflict).copied(),
                }));
            }
            ItemKind::Review => {
                let user = roster_user(store, item.key.uid)?;
                let created = store.user_is_created(item.key.uid);
                let before = item.before.as_ref().and_then(ItemValue::as_review).cloned();
                let after = item.after.as_ref().and_then(ItemValue::as_review).cloned();
                let notify = store.settings().notify_external_reviews
                    && before.is_none()
                    && after.as_ref().is_some_and(|r| !r.rtype.requires_pc())
                    && !user.anonymous;
                let title = store
                    .paper(item.key.pid)
                    .map(|p| p.title.clone())
                    .unwrap_or_default();
                changes.push(Box::new(ReviewChange {
                    pid: item.key.pid,
                    title,
                    user,
                    user_created: created,
                    notify,
                    before,
                    after,
                }));
            }
            ItemKind::Status => {
                let (Some(before), Some(after)) = (
                    item.before.as_ref().and_then(ItemValue::as_status).cloned(),
                    item.after.as_ref().and_then(ItemValue::as_status).cloned(),
                ) else {
                    return Err(InternalError::change_invariant(format!(
                        "status item {} lost a side of its diff",
                        item.key
                    )));
                };
                let title = store
                    .paper(item.key.pid)
                    .map(|p| p.title.clone())
                    .unwrap_or_default();
                changes.push(Box::new(StatusChange {
                    pid: item.key.pid,
                    title,
                    before,
                    after,
                }));
            }
        }
    }

    for finisher in store.finishers() {
        if let Finisher::ClearVoteTags { pid } = finisher {
            let tags = status::vote_tags_to_clear(store, pid);
            if !tags.is_empty() {
                changes.push(Box::new(ClearVoteTagsChange { pid, tags }));
            }
        }
    }

    Ok(changes)
}

fn roster_user(store: &AssignmentStore, uid: UserId) -> Result<User, InternalError> {
    store.user(uid).cloned().ok_or_else(|| {
        InternalError::change_invariant(format!("staged item references unknown user {uid}"))
    })
}

fn review_markup(r: &Review) -> String {
    if r.round.is_empty() {
        r.rtype.token().to_string()
    } else {
        format!("{} ({})", r.rtype.token(), r.round)
    }
}

///
/// ReviewChange
///

pub struct ReviewChange {
    pub pid: PaperId,
    pub title: String,
    pub user: User,
    pub user_created: bool,
    pub notify: bool,
    pub before: Option<Review>,
    pub after: Option<Review>,
}

impl Change for ReviewChange {
    fn add_locks(&self, locks: &mut LockSet) {
        locks.insert(Table::Reviews);
        if self.user_created {
            locks.insert(Table::Users);
        }
    }

    fn describe_markup(&self) -> String {
        let who = self.user.display();
        match (&self.before, &self.after) {
            (None, Some(new)) => {
                format!("{}: {who} **{}**", self.pid, review_markup(new))
            }
            (Some(old), None) => {
                format!("{}: {who} ~~{}~~", self.pid, review_markup(old))
            }
            (Some(old), Some(new)) if old.rtype != new.rtype || old.round != new.round => format!(
                "{}: {who} ~~{}~~ **{}**",
                self.pid,
                review_markup(old),
                review_markup(new)
            ),
            (Some(_), Some(new)) => {
                format!("{}: {who} **{}** back to draft", self.pid, review_markup(new))
            }
            (None, None) => String::new(),
        }
    }

    fn describe_csv(&self, out: &mut DiffExport) {
        let base = ExportRow {
            paper: self.pid.0.to_string(),
            email: self.user.email.clone(),
            ..ExportRow::default()
        };
        match (&self.before, &self.after) {
            (_, Some(new)) if self.before.as_ref().is_none_or(|old| {
                old.rtype != new.rtype || old.round != new.round
            }) =>
            {
                out.push(ExportRow {
                    action: "review".to_string(),
                    reviewtype: new.rtype.token().to_string(),
                    round: new.round.clone(),
                    ..base
                });
            }
            (Some(old), Some(new)) if old.has_progress() && !new.has_progress() => {
                out.push(ExportRow {
                    action: "unsubmitreview".to_string(),
                    reviewtype: new.rtype.token().to_string(),
                    round: new.round.clone(),
                    ..base
                });
            }
            (Some(_), None) => {
                out.push(ExportRow {
                    action: "review".to_string(),
                    reviewtype: "none".to_string(),
                    ..base
                });
            }
            _ => {}
        }
    }

    fn execute(&self, txn: &mut Txn<'_>) -> Result<(), InternalError> {
        if self.user_created {
            txn.put_user(self.user.clone())?;
        }
        match &self.after {
            Some(review) => txn.put_review(self.pid, self.user.id, review.clone())?,
            None => txn.delete_review(self.pid, self.user.id)?,
        }
        Ok(())
    }

    fn cleanup(&self, effects: &mut Effects) {
        if self.notify {
            effects.invite(ReviewInvite {
                email: self.user.email.clone(),
                pid: self.pid,
                title: self.title.clone(),
            });
        }
    }
}

///
/// ConflictChange
///

pub struct ConflictChange {
    pub pid: PaperId,
    pub user: User,
    pub before: Option<ConflictType>,
    pub after: Option<ConflictType>,
}

impl ConflictChange {
    fn tokens(side: Option<ConflictType>) -> String {
        side.map_or_else(|| "none".to_string(), ConflictType::tokens)
    }
}

impl Change for ConflictChange {
    fn add_locks(&self, locks: &mut LockSet) {
        locks.insert(Table::Conflicts);
    }

    fn describe_markup(&self) -> String {
        format!(
            "{}: {} conflict ~~{}~~ **{}**",
            self.pid,
            self.user.display(),
            Self::tokens(self.before),
            Self::tokens(self.after)
        )
    }

    fn describe_csv(&self, out: &mut DiffExport) {
        out.push(ExportRow {
            action: "conflict".to_string(),
            paper: self.pid.0.to_string(),
            email: self.user.email.clone(),
            conflict: Self::tokens(self.after),
            ..ExportRow::default()
        });
    }

    fn execute(&self, txn: &mut Txn<'_>) -> Result<(), InternalError> {
        txn.put_conflict(
            self.pid,
            self.user.id,
            self.after.unwrap_or(ConflictType::NONE),
        )
    }
}

///
/// StatusChange
///
/// The diff rows are re-derived verbs: whatever sequence of status rows
/// produced this net change, the export collapses to at most one
/// withdraw/revive plus one submit/unsubmit.
///

pub struct StatusChange {
    pub pid: PaperId,
    pub title: String,
    pub before: StatusItem,
    pub after: StatusItem,
}

impl StatusChange {
    fn verbs(&self) -> Vec<&'static str> {
        let mut verbs = Vec::new();
        if self.before.time_withdrawn == 0 && self.after.time_withdrawn != 0 {
            verbs.push("withdraw");
        }
        if self.before.time_withdrawn != 0 && self.after.time_withdrawn == 0 {
            verbs.push("revive");
        }
        let was = self.before.time_submitted != 0;
        let is = self.after.time_submitted != 0;
        if !was && is {
            verbs.push("submit");
        }
        if was && !is {
            verbs.push("unsubmit");
        }
        verbs
    }
}

impl Change for StatusChange {
    fn add_locks(&self, locks: &mut LockSet) {
        locks.insert(Table::Papers);
        // The accepted-count aggregate recompute lands in settings.
        locks.insert(Table::Settings);
    }

    fn describe_markup(&self) -> String {
        format!(
            "{} ({}): ~~{}~~ **{}**",
            self.pid,
            self.title,
            self.before.state(),
            self.after.state()
        )
    }

    fn describe_csv(&self, out: &mut DiffExport) {
        for verb in self.verbs() {
            let reason = if verb == "withdraw" {
                self.after.reason.clone().unwrap_or_default()
            } else {
                String::new()
            };
            out.push(ExportRow {
                action: verb.to_string(),
                paper: self.pid.0.to_string(),
                reason,
                ..ExportRow::default()
            });
        }
    }

    fn execute(&self, txn: &mut Txn<'_>) -> Result<(), InternalError> {
        txn.set_paper_status(
            self.pid,
            self.after.time_submitted,
            self.after.time_withdrawn,
            self.after.reason.clone(),
        )?;
        if self.before.counts_as_accepted() != self.after.counts_as_accepted() {
            txn.register_aggregate(AggregateKind::AcceptedCount, self.pid);
        }
        Ok(())
    }
}

///
/// ClearVoteTagsChange
///
/// A consequence, not an instruction: replaying the diff's withdraw row
/// re-derives the clear, so this change emits no CSV of its own.
///

pub struct ClearVoteTagsChange {
    pub pid: PaperId,
    pub tags: Vec<(String, f64)>,
}

impl Change for ClearVoteTagsChange {
    fn add_locks(&self, locks: &mut LockSet) {
        locks.insert(Table::Tags);
    }

    fn describe_markup(&self) -> String {
        let names: Vec<&str> = self.tags.iter().map(|(tag, _)| tag.as_str()).collect();
        format!("{}: clearing vote tags {}", self.pid, names.join(", "))
    }

    fn describe_csv(&self, _out: &mut DiffExport) {}

    fn execute(&self, txn: &mut Txn<'_>) -> Result<(), InternalError> {
        for (tag, _) in &self.tags {
            txn.set_tag(self.pid, tag.clone(), 0.0)?;
        }
        Ok(())
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReviewType;

    fn alice() -> User {
        User::new(UserId(2), "a@x.org", "Alice").pc()
    }

    fn status(ts: i64, tw: i64) -> StatusItem {
        StatusItem {
            time_submitted: ts,
            time_withdrawn: tw,
            reason: None,
            outcome: 0,
        }
    }

    #[test]
    fn new_review_exports_a_replayable_row() {
        let change = ReviewChange {
            pid: PaperId(7),
            title: "t".to_string(),
            user: alice(),
            user_created: false,
            notify: false,
            before: None,
            after: Some(Review::fresh(ReviewType::Primary, "R1")),
        };
        let mut out = DiffExport::new();
        change.describe_csv(&mut out);
        let rows: Vec<_> = out.rows().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "review");
        assert_eq!(rows[0].paper, "7");
        assert_eq!(rows[0].reviewtype, "primary");
        assert_eq!(rows[0].round, "R1");
        assert_eq!(change.describe_markup(), "#7: Alice <a@x.org> **primary (R1)**");
    }

    #[test]
    fn review_removal_exports_the_none_token() {
        let change = ReviewChange {
            pid: PaperId(7),
            title: "t".to_string(),
            user: alice(),
            user_created: false,
            notify: false,
            before: Some(Review::fresh(ReviewType::Secondary, "")),
            after: None,
        };
        let mut out = DiffExport::new();
        change.describe_csv(&mut out);
        let rows: Vec<_> = out.rows().collect();
        assert_eq!(rows[0].reviewtype, "none");
    }

    #[test]
    fn pure_unsubmit_exports_unsubmitreview() {
        let mut before = Review::fresh(ReviewType::Primary, "R1");
        before.non_draft = true;
        let change = ReviewChange {
            pid: PaperId(7),
            title: "t".to_string(),
            user: alice(),
            user_created: false,
            notify: false,
            before: Some(before),
            after: Some(Review::fresh(ReviewType::Primary, "R1")),
        };
        let mut out = DiffExport::new();
        change.describe_csv(&mut out);
        let rows: Vec<_> = out.rows().collect();
        assert_eq!(rows[0].action, "unsubmitreview");
    }

    #[test]
    fn review_locks_users_only_for_created_accounts() {
        let mut change = ReviewChange {
            pid: PaperId(7),
            title: "t".to_string(),
            user: alice(),
            user_created: false,
            notify: false,
            before: None,
            after: Some(Review::fresh(ReviewType::Primary, "")),
        };
        let mut locks = LockSet::new();
        change.add_locks(&mut locks);
        assert!(!locks.contains(Table::Users));

        change.user_created = true;
        change.add_locks(&mut locks);
        assert!(locks.contains(Table::Users));
    }

    #[test]
    fn status_verbs_cover_compound_transitions() {
        // Withdraw of a submitted paper: one verb, ts negation is implied.
        let change = StatusChange {
            pid: PaperId(1),
            title: "t".to_string(),
            before: status(500, 0),
            after: status(-500, 1000),
        };
        assert_eq!(change.verbs(), vec!["withdraw"]);

        // Withdraw of a draft, then submit while withdrawn.
        let change = StatusChange {
            pid: PaperId(1),
            title: "t".to_string(),
            before: status(0, 0),
            after: status(-1000, 1000),
        };
        assert_eq!(change.verbs(), vec!["withdraw", "submit"]);

        let change = StatusChange {
            pid: PaperId(1),
            title: "t".to_string(),
            before: status(-500, 1000),
            after: status(500, 0),
        };
        assert_eq!(change.verbs(), vec!["revive"]);
    }

    #[test]
    fn withdraw_row_carries_the_reason() {
        let mut after = status(-500, 1000);
        after.reason = Some("duplicate".to_string());
        let change = StatusChange {
            pid: PaperId(1),
            title: "t".to_string(),
            before: status(500, 0),
            after,
        };
        let mut out = DiffExport::new();
        change.describe_csv(&mut out);
        let rows: Vec<_> = out.rows().collect();
        assert_eq!(rows[0].action, "withdraw");
        assert_eq!(rows[0].reason, "duplicate");
    }

    #[test]
    fn acceptance_flips_register_the_aggregate() {
        let mut db = crate::db::ConferenceDb::default();
        let mut paper = crate::model::Paper::new(PaperId(1), "t");
        paper.time_submitted = 500;
        paper.outcome = 1;
        db.add_paper(paper);

        let mut before = status(500, 0);
        before.outcome = 1;
        let mut after = status(-500, 1000);
        after.outcome = 1;
        let change = StatusChange {
            pid: PaperId(1),
            title: "t".to_string(),
            before,
            after,
        };

        let mut locks = LockSet::new();
        change.add_locks(&mut locks);
        let mut txn = db.transaction(locks);
        change.execute(&mut txn).unwrap();
        let aggregates = txn.commit();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].0, AggregateKind::AcceptedCount);
    }

    #[test]
    fn vote_tag_clears_emit_no_csv() {
        let change = ClearVoteTagsChange {
            pid: PaperId(1),
            tags: vec![("7~vote".to_string(), 5.0)],
        };
        let mut out = DiffExport::new();
        change.describe_csv(&mut out);
        assert!(out.is_empty());
        assert_eq!(change.describe_markup(), "#1: clearing vote tags 7~vote");
    }

    #[test]
    fn conflict_change_exports_final_tokens() {
        let change = ConflictChange {
            pid: PaperId(3),
            user: alice(),
            before: None,
            after: Some(ConflictType::COLLABORATOR.insert(ConflictType::PINNED)),
        };
        let mut out = DiffExport::new();
        change.describe_csv(&mut out);
        let rows: Vec<_> = out.rows().collect();
        assert_eq!(rows[0].action, "conflict");
        assert_eq!(rows[0].conflict, "collaborator pinned");
    }

    #[test]
    fn cleanup_queues_invites_only_when_flagged() {
        let change = ReviewChange {
            pid: PaperId(7),
            title: "Deep Nets".to_string(),
            user: User::new(UserId(9), "ext@y.org", "Ed"),
            user_created: true,
            notify: true,
            before: None,
            after: Some(Review::fresh(ReviewType::External, "")),
        };
        let mut effects = Effects::default();
        change.cleanup(&mut effects);
        assert!(!effects.is_empty());
    }
}
