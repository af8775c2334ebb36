//! Retirement portfolio projection: a deterministic year-by-year timeline,
//! a seeded Monte Carlo simulation and a safe withdrawal rate search.

pub mod api;
pub mod core;
pub mod error;
pub mod export;
pub mod logging;
pub mod store;

pub use error::{ProjectionError, Result};
