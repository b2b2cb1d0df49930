//! Ranking and quota distribution service for university scholarship
//! applications. The HTTP surface in [`ranking::router`] implements the data
//! contract consumed by the portal frontend; [`ranking::distribution`] holds
//! the allocation engine itself.

pub mod config;
pub mod error;
pub mod ranking;
pub mod telemetry;
