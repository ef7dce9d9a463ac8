use crate::{
    batch::row::RowSpec,
    db::ConferenceDb,
    error::InternalError,
    kind::{MutationKind, UserUniverse},
    message::MessageSet,
    model::{Actor, ConflictSpec, ConflictType, PaperId, UserId},
    obs::{self, BatchEvent},
    store::{AssignmentStore, ItemKey, ItemKind, ItemValue, Reject, StageError},
};

/// Bulk-load all conflict rows for the working set. Other kinds depend on
/// this state (review conflict gating, status contact permissions), so it
/// is callable outside the plugin.
pub(crate) fn ensure_loaded(
    db: &ConferenceDb,
    store: &mut AssignmentStore,
) -> Result<(), InternalError> {
    if !store.mark_kind_loaded(ItemKind::Conflict) {
        return Ok(());
    }
    let rows: Vec<_> = db
        .conflicts()
        .filter(|(pid, _, _)| store.paper(*pid).is_some())
        .collect();
    let items = rows.len();
    for (pid, uid, ct) in rows {
        store.load(ItemKey::conflict(pid, uid), ItemValue::Conflict(ct))?;
    }
    obs::emit(BatchEvent::KindLoaded {
        kind: ItemKind::Conflict,
        items,
    });
    Ok(())
}

///
/// ConflictKind
///

pub struct ConflictKind;

impl MutationKind for ConflictKind {
    fn item_kind(&self) -> ItemKind {
        ItemKind::Conflict
    }

    fn load_state(
        &self,
        db: &ConferenceDb,
        store: &mut AssignmentStore,
    ) -> Result<(), InternalError> {
        ensure_loaded(db, store)
    }

    fn user_universe(&self, _row: &RowSpec) -> UserUniverse {
        UserUniverse::Pc
    }

    fn expand_any_user(
        &self,
        pid: PaperId,
        _row: &RowSpec,
        store: &AssignmentStore,
    ) -> Result<Option<Vec<UserId>>, Reject> {
        // Every user with a staged conflict on the paper.
        let uids = store
            .items_for_paper(ItemKind::Conflict, pid)
            .filter(|item| {
                item.after
                    .as_ref()
                    .and_then(ItemValue::as_conflict)
                    .is_some_and(|ct| ct.is_conflicted())
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
        _row: &RowSpec,
        _actor: &Actor,
        store: &AssignmentStore,
    ) -> Result<(), Reject> {
        match store.user(uid) {
            Some(user) if user.disabled => Err(Reject::new(format!(
                "account {} is disabled",
                user.email
            ))),
            Some(_) => Ok(()),
            None => Err(Reject::new(format!("unknown user {uid}"))),
        }
    }

    fn apply(
        &self,
        pid: PaperId,
        uid: UserId,
        row: &RowSpec,
        actor: &Actor,
        store: &mut AssignmentStore,
        messages: &mut MessageSet,
    ) -> Result<(), StageError> {
        let spec = ConflictSpec::parse(row.column("conflict").unwrap_or("yes"))
            .map_err(|err| Reject::new(err.to_string()))?;

        let admin = actor.can_administer();
        if spec.pin.is_some() && !admin {
            return Err(Reject::new("only an administrator may pin or unpin a conflict").into());
        }

        // Contact-count context must come from outside the mutator: the
        // guard depends on *other* staged items.
        let other_contacts = store.contact_count(pid, Some(uid));
        let mut pinned_noop = false;

        store.stage(
            ItemKey::conflict(pid, uid),
            &row.landmark,
            row.override_conflict,
            |cur| {
                let prev = cur
                    .and_then(ItemValue::as_conflict)
                    .copied()
                    .unwrap_or(ConflictType::NONE);

                if let Some(require) = spec.require
                    && prev.classification() != require
                {
                    return Ok(cur.cloned());
                }
                if prev.is_pinned() && !admin {
                    pinned_noop = true;
                    return Ok(cur.cloned());
                }

                let mut next = spec.net(prev);
                match spec.pin {
                    Some(true) => next = next.insert(ConflictType::PINNED),
                    Some(false) => next = next.remove(ConflictType::PINNED),
                    None => {}
                }

                if prev.is_contact() && !next.is_contact() && other_contacts == 0 {
                    return Err(Reject::new(format!(
                        "paper {pid} would be left without a contact author"
                    )));
                }

                Ok(if next.is_empty() {
                    None
                } else {
                    Some(ItemValue::Conflict(next))
                })
            },
        )?;

        if pinned_noop {
            messages.warning(
                &row.landmark,
                format!("conflict for paper {pid} is pinned; leaving it unchanged"),
            );
        }
        Ok(())
    }
}

///
/// TESTS
///
