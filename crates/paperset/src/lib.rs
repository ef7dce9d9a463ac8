//! Bulk assignment engine for conference review management.
//!
//! A batch of tabular mutation requests (review assignments, conflict
//! edits, submission-status changes) is validated against a staged copy
//! of the durable state, previewed as a replayable diff, and committed
//! atomically under a declared lock set.
//!
//! ## Crate layout
//! - `batch`: the orchestrator, row model, and paper selectors.
//! - `change`: committed-change objects, locks, and post-commit effects.
//! - `csv`: the tabular request/diff interface.
//! - `db`: durable tables and the buffered write transaction.
//! - `error`: structured internal errors.
//! - `kind`: per-action mutation plugins.
//! - `message`: landmark-tagged row messages.
//! - `model`: papers, users, reviews, conflicts, conference settings.
//! - `obs`: the batch event sink boundary.
//! - `store`: the staged relation store shared by one batch.

pub mod batch;
pub mod change;
pub mod csv;
pub mod db;
pub mod error;
pub mod kind;
pub mod message;
pub mod model;
pub mod obs;
pub mod store;


//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::{
        batch::{AssignmentSet, NoSearcher, PaperSearcher, RowSpec},
        change::{Change as _, Mailer, NoMailer, ReviewInvite},
        db::{ConferenceDb, LockSet, Table},
        error::InternalError,
        message::{Landmark, Message, MessageSet, Severity},
        model::{
            Actor, ConferenceSettings, ConflictType, Now, Paper, PaperId, PaperState, Review,
            ReviewType, User, UserId,
        },
        store::{AssignmentStore, ItemKey, ItemKind, ItemValue},
    };
}
