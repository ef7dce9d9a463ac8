use crate::{
    batch::row::RowSpec,
    db::ConferenceDb,
    error::InternalError,
    kind::{MutationKind, UserUniverse},
    message::MessageSet,
    model::{Actor, PaperId, UserId},
    obs::{self, BatchEvent},
    store::{
        AssignmentStore, Finisher, ItemKey, ItemKind, ItemValue, Reject, StageError, StatusItem,
    },
};

/// Bulk-load one status row per working-set paper. Contact permissions
/// also need conflict state, so that loader runs first.
pub(crate) fn ensure_loaded(
    db: &ConferenceDb,
    store: &mut AssignmentStore,
) -> Result<(), InternalError> {
    super::conflict::ensure_loaded(db, store)?;
    if !store.mark_kind_loaded(ItemKind::Status) {
        return Ok(());
    }
    let rows: Vec<_> = store
        .prows()
        .map(|p| {
            (
                p.id,
                StatusItem {
                    time_submitted: p.time_submitted,
                    time_withdrawn: p.time_withdrawn,
                    reason: p.withdraw_reason.clone(),
                    outcome: p.outcome,
                },
            )
        })
        .collect();
    let items = rows.len();
    for (pid, status) in rows {
        store.load(ItemKey::status(pid), ItemValue::Status(status))?;
    }
    obs::emit(BatchEvent::KindLoaded {
        kind: ItemKind::Status,
        items,
    });
    Ok(())
}

/// Vote tags that the clear-vote-tags finisher should zero: nonzero
/// vote-tag values on a paper that *ends* the batch withdrawn. A revive
/// later in the same sheet empties this.
#[must_use]
pub(crate) fn vote_tags_to_clear(store: &AssignmentStore, pid: PaperId) -> Vec<(String, f64)> {
    let withdrawn = store
        .current(&ItemKey::status(pid))
        .and_then(ItemValue::as_status)
        .is_some_and(|st| st.time_withdrawn != 0);
    if withdrawn {
        store.vote_tags_for_paper(pid)
    } else {
        Vec::new()
    }
}

///
/// StatusAction
///
/// The four submission-status verbs. Each registers as its own sheet
/// action; the plugin instance carries which one it is.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusAction {
    Submit,
    Unsubmit,
    Withdraw,
    Revive,
}

impl StatusAction {
    pub const ALL: [Self; 4] = [Self::Submit, Self::Unsubmit, Self::Withdraw, Self::Revive];

    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Unsubmit => "unsubmit",
            Self::Withdraw => "withdraw",
            Self::Revive => "revive",
        }
    }
}

///
/// StatusKind
///
/// Submission status is paper-scoped: the subject slot carries the
/// sentinel user and the state machine below is the whole semantics.
/// Failed preconditions are no-ops; failed permissions are rejections.
///

pub struct StatusKind {
    action: StatusAction,
}

impl StatusKind {
    #[must_use]
    pub const fn new(action: StatusAction) -> Self {
        Self { action }
    }
}

impl MutationKind for StatusKind {
    fn item_kind(&self) -> ItemKind {
        ItemKind::Status
    }

    fn load_state(
        &self,
        db: &ConferenceDb,
        store: &mut AssignmentStore,
    ) -> Result<(), InternalError> {
        ensure_loaded(db, store)
    }

    fn user_universe(&self, _row: &RowSpec) -> UserUniverse {
        UserUniverse::Any
    }

    fn expand_any_user(
        &self,
        _pid: PaperId,
        _row: &RowSpec,
        _store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        Ok(Some(vec![UserId::NONE]))
    }

    fn expand_missing_user(
        &self,
        _pid: PaperId,
        _row: &RowSpec,
        _store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        Ok(Some(vec![UserId::NONE]))
    }

    fn allow_paper(
        &self,
        pid: PaperId,
        actor: &Actor,
        store: &AssignmentStore,
    ) -> Result<(), Reject> {
        // Contact authors may manage their own paper's status.
        if actor.can_administer() || store.is_contact(pid, actor.uid) {
            Ok(())
        } else {
            Err(Reject::new(format!(
                "you cannot change the status of paper {pid}"
            )))
        }
    }

    fn allow_user(
        &self,
        _pid: PaperId,
        uid: UserId,
        _row: &RowSpec,
        _actor: &Actor,
        _store: &AssignmentStore,
    ) -> Result<(), Reject> {
        if uid.is_none() {
            Ok(())
        } else {
            Err(Reject::new("status actions do not take a user"))
        }
    }

    fn apply(
        &self,
        pid: PaperId,
        _uid: UserId,
        row: &RowSpec,
        _actor: &Actor,
        store: &mut AssignmentStore,
        _messages: &mut MessageSet,
    ) -> Result<(), StageError> {
        let action = self.action;
        let now = store.now().secs();
        let reason = row.column("reason").map(str::to_string);

        // The loader creates one status item per working-set paper.
        if store.item(&ItemKey::status(pid)).is_none() {
            return Err(InternalError::kind_invariant(format!(
                "no status item loaded for paper {pid}"
            ))
            .into());
        }

        let changed = store.stage(
            ItemKey::status(pid),
            &row.landmark,
            row.override_conflict,
            |cur| {
                let Some(st) = cur.and_then(ItemValue::as_status) else {
                    return Ok(cur.cloned());
                };
                let mut next = st.clone();
                match action {
                    StatusAction::Submit => {
                        if next.time_submitted != 0 {
                            return Ok(cur.cloned());
                        }
                        // A withdrawn paper remembers its submitted state
                        // as a negated restore point.
                        next.time_submitted = if next.time_withdrawn != 0 { -now } else { now };
                    }
                    StatusAction::Unsubmit => {
                        if next.time_submitted == 0 {
                            return Ok(cur.cloned());
                        }
                        next.time_submitted = 0;
                    }
                    StatusAction::Withdraw => {
                        if next.time_withdrawn != 0 {
                            return Ok(cur.cloned());
                        }
                        next.time_withdrawn = now;
                        next.time_submitted = -next.time_submitted;
                        if reason.is_some() {
                            next.reason = reason.clone();
                        }
                    }
                    StatusAction::Revive => {
                        if next.time_withdrawn == 0 {
                            return Ok(cur.cloned());
                        }
                        next.time_withdrawn = 0;
                        next.time_submitted = -next.time_submitted;
                        next.reason = None;
                    }
                }
                Ok(Some(ItemValue::Status(next)))
            },
        )?;

        if changed
            && action == StatusAction::Withdraw
            && !store.settings().vote_tags.is_empty()
        {
            store.register_finisher(Finisher::ClearVoteTags { pid });
        }
        Ok(())
    }
}

///
/// TESTS
///
