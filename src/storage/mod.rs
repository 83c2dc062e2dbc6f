//! SQLite storage module for PMU programme data
//!
//! Provides persistent storage for countries, venues, meetings, races and
//! participants, plus idempotent reconciliation of upstream payloads.

pub mod reconcile;
pub mod repository;
pub mod schema;

pub use reconcile::{BatchSummary, Reconciler};
pub use repository::{Database, ParticipantRow, RaceRow, UnitOfWork};
pub use schema::{create_tables, validate_columns};
