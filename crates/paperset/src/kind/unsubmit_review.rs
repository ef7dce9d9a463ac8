use crate::{
    batch::row::RowSpec,
    db::ConferenceDb,
    error::InternalError,
    kind::{MutationKind, UserUniverse, review},
    message::MessageSet,
    model::{Actor, PaperId, ReviewTypeSpec, RoundMatch, UserId},
    store::{AssignmentStore, ItemKey, ItemKind, ItemValue, Reject, StageError},
};

fn parse_filters(row: &RowSpec) -> Result<(ReviewTypeSpec, RoundMatch), Reject> {
    let rtype = match row.column("reviewtype") {
        Some(value) => {
            ReviewTypeSpec::parse(value).map_err(|err| Reject::new(err.to_string()))?
        }
        None => ReviewTypeSpec::Any,
    };
    let round = row.column("round").map_or(RoundMatch::Any, RoundMatch::parse);
    Ok((rtype, round))
}

///
/// UnsubmitReviewKind
///
/// Pushes matching reviews back to the draft state without touching their
/// type or round. Both user and filter columns narrow the same candidate
/// set: reviews with submission progress.
///

pub struct UnsubmitReviewKind;

impl UnsubmitReviewKind {
    fn expand(
        pid: PaperId,
        row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Vec<UserId>, Reject> {
        let (rtype, round) = parse_filters(row)?;
        Ok(store
            .items_for_paper(ItemKind::Review, pid)
            .filter(|item| {
                item.after
                    .as_ref()
                    .and_then(ItemValue::as_review)
                    .is_some_and(|r| {
                        r.has_progress() && rtype.matches(r.rtype) && round.matches(&r.round)
                    })
            })
            .map(|item| item.key.uid)
            .collect())
    }
}

impl MutationKind for UnsubmitReviewKind {
    fn item_kind(&self) -> ItemKind {
        ItemKind::Review
    }

    fn load_state(
        &self,
        db: &ConferenceDb,
        store: &mut AssignmentStore,
    ) -> Result<(), InternalError> {
        review::ensure_loaded(db, store)
    }

    fn user_universe(&self, _row: &RowSpec) -> UserUniverse {
        UserUniverse::Reviewers
    }

    fn expand_any_user(
        &self,
        pid: PaperId,
        row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        Self::expand(pid, row, store).map(Some)
    }

    fn expand_missing_user(
        &self,
        pid: PaperId,
        row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        // A missing user means "every matching reviewer".
        Self::expand(pid, row, store).map(Some)
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
        _row: &RowSpec,
        _actor: &Actor,
        store: &AssignmentStore,
    ) -> Result<(), Reject> {
        if store.user(uid).is_some() {
            Ok(())
        } else {
            Err(Reject::new(format!("unknown user {uid}")))
        }
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
        let (rtype, round) = parse_filters(row)?;

        store.stage(
            ItemKey::review(pid, uid),
            &row.landmark,
            row.override_conflict,
            |cur| {
                let Some(r) = cur.and_then(ItemValue::as_review) else {
                    return Ok(cur.cloned());
                };
                if !r.has_progress() || !rtype.matches(r.rtype) || !round.matches(&r.round) {
                    return Ok(cur.cloned());
                }
                let mut next = r.clone();
                next.time_submitted = 0;
                next.non_draft = false;
                Ok(Some(ItemValue::Review(next)))
            },
        )?;
        Ok(())
    }
}

///
/// TESTS
///
