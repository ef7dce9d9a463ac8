use crate::{
    batch::row::RowSpec,
    db::ConferenceDb,
    error::InternalError,
    kind::{MutationKind, UserUniverse, conflict},
    message::MessageSet,
    model::{
        Actor, PaperId, Review, ReviewSpec, ReviewType, ReviewTypeSpec, RoundMatch, RoundSpec,
        UserId,
    },
    obs::{self, BatchEvent},
    store::{
        AssignmentStore, Finisher, ItemKey, ItemKind, ItemValue, Reject, StageError, StagedItem,
    },
};

pub(crate) fn ensure_loaded(
    db: &ConferenceDb,
    store: &mut AssignmentStore,
) -> Result<(), InternalError> {
    if !store.mark_kind_loaded(ItemKind::Review) {
        return Ok(());
    }
    let rows: Vec<_> = db
        .reviews()
        .filter(|(pid, _, _)| store.paper(*pid).is_some())
        .map(|(pid, uid, review)| (pid, uid, review.clone()))
        .collect();
    let items = rows.len();
    for (pid, uid, review) in rows {
        store.load(ItemKey::review(pid, uid), ItemValue::Review(review))?;
    }
    obs::emit(BatchEvent::KindLoaded {
        kind: ItemKind::Review,
        items,
    });
    Ok(())
}

fn parse_specs(row: &RowSpec, store: &AssignmentStore) -> Result<(ReviewSpec, RoundSpec), Reject> {
    let rspec = ReviewSpec::parse(row.column("reviewtype").unwrap_or("any"))
        .map_err(|err| Reject::new(err.to_string()))?;
    let round = match row.column("round") {
        Some(value) => RoundSpec::parse(value, store.settings())
            .map_err(|err| Reject::new(err.to_string()))?,
        None => RoundSpec::any(),
    };
    Ok((rspec, round))
}

///
/// ReviewKind
///

pub struct ReviewKind;

impl MutationKind for ReviewKind {
    fn item_kind(&self) -> ItemKind {
        ItemKind::Review
    }

    fn load_state(
        &self,
        db: &ConferenceDb,
        store: &mut AssignmentStore,
    ) -> Result<(), InternalError> {
        ensure_loaded(db, store)?;
        // The deferred conflict check reads the staged conflict state.
        conflict::ensure_loaded(db, store)
    }

    fn user_universe(&self, _row: &RowSpec) -> UserUniverse {
        UserUniverse::Reviewers
    }

    // External reviewers may be named by an email the roster has never
    // seen, and anonymous review identities are minted on demand.
    fn may_create_users(&self) -> bool {
        true
    }

    fn expand_any_user(
        &self,
        pid: PaperId,
        row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        let (rspec, round) = parse_specs(row, store)?;
        let require = rspec.require.unwrap_or(ReviewTypeSpec::Any);
        let round_filter = round.require.clone().unwrap_or(RoundMatch::Any);
        let uids = store
            .items_for_paper(ItemKind::Review, pid)
            .filter(|item| {
                item.after
                    .as_ref()
                    .and_then(ItemValue::as_review)
                    .is_some_and(|r| require.matches(r.rtype) && round_filter.matches(&r.round))
            })
            .map(|item| item.key.uid)
            .collect::<Vec<_>>();
        Ok(Some(uids))
    }

    fn expand_missing_user(
        &self,
        _pid: PaperId,
        _row: &RowSpec,
        _store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        // A review needs a concrete reviewer; fall through so the
        // orchestrator rejects the row.
        Ok(None)
    }

    fn allow_paper(
        &self,
        pid: PaperId,
        actor: &Actor,
        _store: &AssignmentStore,
    ) -> Result<(), Reject> {
        if actor.can_administer() {
            Ok(())
        } else {
            Err(Reject::new(format!("you cannot administer paper {pid}")))
        }
    }

    fn allow_user(
        &self,
        _pid: PaperId,
        uid: UserId,
        row: &RowSpec,
        _actor: &Actor,
        store: &AssignmentStore,
    ) -> Result<(), Reject> {
        let Some(user) = store.user(uid) else {
            return Err(Reject::new(format!("unknown user {uid}")));
        };
        if user.disabled {
            return Err(Reject::new(format!("account {} is disabled", user.email)));
        }
        let (rspec, _) = parse_specs(row, store)?;
        if let ReviewTypeSpec::Type(rtype) = rspec.target {
            if rtype.requires_pc() && !user.pc_member {
                return Err(Reject::new(format!(
                    "{} must be a PC member to hold a {}",
                    user.email,
                    rtype.label()
                )));
            }
            if rtype == ReviewType::External && user.pc_member {
                return Err(Reject::new(format!(
                    "PC member {} cannot hold an external review",
                    user.email
                )));
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        pid: PaperId,
        uid: UserId,
        row: &RowSpec,
        _actor: &Actor,
        store: &mut AssignmentStore,
        _messages: &mut MessageSet,
    ) -> Result<(), StageError> {
        let (rspec, round_spec) = parse_specs(row, store)?;

        store.stage(
            ItemKey::review(pid, uid),
            &row.landmark,
            row.override_conflict,
            |cur| {
                let cur = cur.and_then(ItemValue::as_review);

                if let Some(require) = rspec.require {
                    let matched = match require {
                        ReviewTypeSpec::Any => true,
                        ReviewTypeSpec::None => cur.is_none(),
                        ReviewTypeSpec::Type(t) => cur.is_some_and(|r| r.rtype == t),
                    };
                    if !matched {
                        return Ok(cur.cloned().map(ItemValue::Review));
                    }
                }
                if let Some(round_require) = &round_spec.require
                    && !cur.is_some_and(|r| round_require.matches(&r.round))
                {
                    return Ok(cur.cloned().map(ItemValue::Review));
                }

                match (rspec.target, cur) {
                    (ReviewTypeSpec::None, None) => Ok(None),
                    (ReviewTypeSpec::None, Some(r)) => {
                        if r.submitted() {
                            Err(Reject::new(format!(
                                "{} review of paper {pid} is already submitted and will not be removed",
                                r.round_label()
                            )))
                        } else {
                            Ok(None)
                        }
                    }
                    (ReviewTypeSpec::Any, None) => {
                        Err(Reject::new("review type required to create a review"))
                    }
                    (ReviewTypeSpec::Type(rtype), None) => {
                        let round = match &round_spec.target {
                            RoundMatch::Name(name) => name.clone(),
                            RoundMatch::Any => String::new(),
                        };
                        Ok(Some(ItemValue::Review(Review::fresh(rtype, round))))
                    }
                    (target, Some(r)) => {
                        let rtype = match target {
                            ReviewTypeSpec::Type(t) => t,
                            _ => r.rtype,
                        };
                        let mut next = r.clone();
                        let round_changed = match &round_spec.target {
                            RoundMatch::Any => false,
                            RoundMatch::Name(name) => !name.eq_ignore_ascii_case(&r.round),
                        };
                        if r.submitted() {
                            if rtype < r.rtype {
                                return Err(Reject::new(format!(
                                    "review of paper {pid} is already submitted and will not be downgraded"
                                )));
                            }
                            if round_changed {
                                return Err(Reject::new(format!(
                                    "review of paper {pid} is already submitted; its round will not change"
                                )));
                            }
                        } else if rtype != r.rtype || round_changed {
                            // Force an in-progress review back to draft.
                            next.non_draft = false;
                        }
                        if round_changed
                            && let RoundMatch::Name(name) = &round_spec.target
                        {
                            next.round = name.clone();
                        }
                        next.rtype = rtype;
                        Ok(Some(ItemValue::Review(next)))
                    }
                }
            },
        )?;

        store.register_finisher(Finisher::CheckReviewConflicts);
        Ok(())
    }
}

/// A staged review falls under the deferred gate when it is brand new or
/// when it escalates the review type over the durable one.
fn gate_applies(item: &StagedItem) -> bool {
    let Some(after) = item.after.as_ref().and_then(ItemValue::as_review) else {
        return false;
    };
    match item.before.as_ref().and_then(ItemValue::as_review) {
        None => true,
        Some(before) => after.rtype > before.rtype,
    }
}

/// Deferred conflict gate: runs once against the final staged state. A new
/// or escalated review assignment to a user with a staged conflict is
/// reverted with an error, unless the row carried the override flag and the
/// actor can administer the paper, in which case the assignment stands with
/// a warning.
pub(crate) fn check_unconflicted(
    store: &mut AssignmentStore,
    actor: &Actor,
    messages: &mut MessageSet,
) {
    let candidates: Vec<_> = store
        .items_of_kind(ItemKind::Review)
        .filter(|item| gate_applies(item))
        .map(|item| (item.key, item.landmark.clone(), item.override_conflict))
        .collect();

    for (key, landmark, overridden) in candidates {
        let conflicted = store
            .current(&ItemKey::conflict(key.pid, key.uid))
            .and_then(ItemValue::as_conflict)
            .is_some_and(|ct| ct.is_conflicted());
        if !conflicted {
            continue;
        }
        let who = store
            .user(key.uid)
            .map_or_else(|| key.uid.to_string(), crate::model::User::display);
        if overridden && actor.can_administer() {
            messages.warning(
                &landmark,
                format!("overriding conflict between {who} and paper {}", key.pid),
            );
        } else {
            messages.error(
                &landmark,
                format!("{who} has a conflict with paper {}", key.pid),
            );
            store.revert(&key);
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConferenceSettings, ConflictType, Now, Paper, User};

    fn db() -> ConferenceDb {
        let mut db = ConferenceDb::new(ConferenceSettings {
            rounds: vec!["R1".to_string(), "R2".to_string()],
            ..ConferenceSettings::default()
        });
        db.add_paper(Paper::new(PaperId(1), "one"));
        db.add_user(User::new(UserId(1), "chair@x.org", "Chair").chaired());
        db.add_user(User::new(UserId(2), "a@x.org", "Alice").pc());
        db.add_user(User::new(UserId(3), "ext@y.org", "Ed"));
        db
    }

    fn staged_review(store: &AssignmentStore, uid: UserId) -> Option<Review> {
        store
            .current(&ItemKey::review(PaperId(1), uid))
            .and_then(ItemValue::as_review)
            .cloned()
    }

    fn apply_row(
        db: &ConferenceDb,
        store: &mut AssignmentStore,
        row: &RowSpec,
        uid: UserId,
    ) -> Result<(), StageError> {
        let kind = ReviewKind;
        kind.load_state(db, store).unwrap();
        let actor = Actor::chair(UserId(1));
        let mut messages = MessageSet::new();
        kind.apply(PaperId(1), uid, row, &actor, store, &mut messages)
    }

    #[test]
    fn creates_a_fresh_review_with_round() {
        let db = db();
        let mut store = AssignmentStore::new(&db, Now(1000));
        let row = RowSpec::new("review")
            .field("reviewtype", "primary")
            .field("round", "R1");
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();

        let review = staged_review(&store, UserId(2)).unwrap();
        assert_eq!(review.rtype, ReviewType::Primary);
        assert_eq!(review.round, "R1");
        assert!(!review.submitted());
    }

    #[test]
    fn creation_requires_a_concrete_type() {
        let db = db();
        let mut store = AssignmentStore::new(&db, Now(1000));
        let row = RowSpec::new("review");
        let err = apply_row(&db, &mut store, &row, UserId(2)).unwrap_err();
        assert!(matches!(err, StageError::Reject(_)));
    }

    #[test]
    fn submitted_reviews_never_downgrade() {
        let mut db = db();
        let mut review = Review::fresh(ReviewType::Primary, "R1");
        review.time_submitted = 500;
        db.add_review(PaperId(1), UserId(2), review);

        let mut store = AssignmentStore::new(&db, Now(1000));
        let row = RowSpec::new("review").field("reviewtype", "secondary");
        let err = apply_row(&db, &mut store, &row, UserId(2)).unwrap_err();
        assert!(matches!(err, StageError::Reject(_)));

        // Promotion of a submitted review is allowed.
        let row = RowSpec::new("review").field("reviewtype", "meta");
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();
        assert_eq!(staged_review(&store, UserId(2)).unwrap().rtype, ReviewType::Meta);
    }

    #[test]
    fn type_change_forces_unsubmitted_review_back_to_draft() {
        let mut db = db();
        let mut review = Review::fresh(ReviewType::Secondary, "R1");
        review.non_draft = true;
        db.add_review(PaperId(1), UserId(2), review);

        let mut store = AssignmentStore::new(&db, Now(1000));
        let row = RowSpec::new("review").field("reviewtype", "primary");
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();

        let staged = staged_review(&store, UserId(2)).unwrap();
        assert_eq!(staged.rtype, ReviewType::Primary);
        assert!(!staged.non_draft);
    }

    #[test]
    fn pair_spec_skips_non_matching_reviews() {
        let mut db = db();
        db.add_review(PaperId(1), UserId(2), Review::fresh(ReviewType::Secondary, "R1"));

        let mut store = AssignmentStore::new(&db, Now(1000));
        let row = RowSpec::new("review").field("reviewtype", "primary:meta");
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();
        assert_eq!(
            staged_review(&store, UserId(2)).unwrap().rtype,
            ReviewType::Secondary
        );
    }

    #[test]
    fn pc_types_require_pc_members() {
        let db = db();
        let store = AssignmentStore::new(&db, Now(1000));
        let kind = ReviewKind;
        let actor = Actor::chair(UserId(1));

        let row = RowSpec::new("review").field("reviewtype", "primary");
        // ensure roster lookups work without loading review state
        let err = kind
            .allow_user(PaperId(1), UserId(3), &row, &actor, &store)
            .unwrap_err();
        assert!(err.0.contains("must be a PC member"));

        let row = RowSpec::new("review").field("reviewtype", "external");
        let err = kind
            .allow_user(PaperId(1), UserId(2), &row, &actor, &store)
            .unwrap_err();
        assert!(err.0.contains("cannot hold an external review"));
    }

    #[test]
    fn conflict_gate_reverts_without_override() {
        let mut db = db();
        db.add_conflict(PaperId(1), UserId(2), ConflictType::COLLABORATOR);
        let mut store = AssignmentStore::new(&db, Now(1000));

        let row = RowSpec::new("review").field("reviewtype", "primary");
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();
        assert!(gate_applies(
            store.item(&ItemKey::review(PaperId(1), UserId(2))).unwrap()
        ));

        let actor = Actor::chair(UserId(1));
        let mut messages = MessageSet::new();
        check_unconflicted(&mut store, &actor, &mut messages);

        assert!(messages.has_error());
        assert_eq!(staged_review(&store, UserId(2)), None);
    }

    #[test]
    fn conflict_gate_covers_escalations_of_existing_reviews() {
        let mut db = db();
        db.add_review(PaperId(1), UserId(2), Review::fresh(ReviewType::Secondary, "R1"));
        let mut store = AssignmentStore::new(&db, Now(1000));
        let actor = Actor::chair(UserId(1));

        // One batch: stage a conflict for the sitting reviewer, then
        // promote her review.
        let conflict_kind = crate::kind::conflict::ConflictKind;
        conflict_kind.load_state(&db, &mut store).unwrap();
        let mut messages = MessageSet::new();
        let row = RowSpec::new("conflict").field("conflict", "collaborator");
        conflict_kind
            .apply(PaperId(1), UserId(2), &row, &actor, &mut store, &mut messages)
            .unwrap();

        let row = RowSpec::new("review").field("reviewtype", "meta");
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();

        check_unconflicted(&mut store, &actor, &mut messages);
        assert!(messages.has_error());
        // The promotion is rolled back, not the durable review.
        assert_eq!(
            staged_review(&store, UserId(2)).unwrap().rtype,
            ReviewType::Secondary
        );
    }

    #[test]
    fn conflict_gate_downgrades_with_override_and_admin() {
        let mut db = db();
        db.add_conflict(PaperId(1), UserId(2), ConflictType::COLLABORATOR);
        let mut store = AssignmentStore::new(&db, Now(1000));

        let row = RowSpec::new("review")
            .field("reviewtype", "primary")
            .overriding();
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();

        let actor = Actor::chair(UserId(1));
        let mut messages = MessageSet::new();
        check_unconflicted(&mut store, &actor, &mut messages);

        assert!(!messages.has_error());
        assert_eq!(messages.max_severity(), Some(crate::message::Severity::Warning));
        assert!(staged_review(&store, UserId(2)).is_some());
    }

    #[test]
    fn conflict_gate_ignores_override_without_admin_right() {
        let mut db = db();
        db.add_conflict(PaperId(1), UserId(2), ConflictType::COLLABORATOR);
        let mut store = AssignmentStore::new(&db, Now(1000));

        let row = RowSpec::new("review")
            .field("reviewtype", "primary")
            .overriding();
        apply_row(&db, &mut store, &row, UserId(2)).unwrap();

        let actor = Actor::pc(UserId(9));
        let mut messages = MessageSet::new();
        check_unconflicted(&mut store, &actor, &mut messages);

        assert!(messages.has_error());
        assert_eq!(staged_review(&store, UserId(2)), None);
    }
}
