//! Availability and conflict engine for bookable stays.
//!
//! Records which nights of each stay are taken, reserves date ranges
//! atomically, filters search candidates by availability, and refuses to
//! delete stays that still have guests coming.

pub mod clock;
pub mod config;
pub mod engine;
pub mod geo;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod wal;

pub use engine::{Engine, EngineError, SearchQuery};
