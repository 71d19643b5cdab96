//! Data models shared by the fixity steps and the local object store.
//!
//! [`state::StateRecord`] is the unit of progress the orchestrator passes
//! between steps. The bucket and object types map onto the SQLite tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod bucket;
pub mod object;
pub mod state;
