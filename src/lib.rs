//! # renderq
//!
//! Render farm scheduler. A periodic tick watches worker liveness, retries
//! failed renders within a budget, and dispatches pending tasks by strict
//! priority tier, preempting a render of another tier once it has run past
//! the candidate's gate. Workers may also pull work themselves through [`Farm`].
//!
//! State lives behind the [`store::Store`] traits: [`store::MemoryStore`] for
//! tests and single-process runs, [`db::Db`] for Postgres.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod farm;
pub mod model;
pub mod store;
pub mod telemetry;

pub use engine::Scheduler;
pub use error::{Error, Result};
pub use farm::Farm;
