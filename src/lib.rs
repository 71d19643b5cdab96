//! Chunked, resumable fixity checking for objects in tiered storage.
//!
//! An external orchestrator threads a [`models::state::StateRecord`] through
//! three steps: restore the object out of an archive tier if needed, hash it
//! one byte range per invocation, then reconcile the digest with a reference
//! checksum. [`services::fixity::FixityService`] exposes those steps and the
//! `routes` module serves them over HTTP next to a small SQLite-backed local
//! object store.

pub mod config;
pub mod digest;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
