//! Budget pacing, autopilot and audit engine for Zemanta One.
//!
//! The crate is organised the way the daily jobs run:
//!   - `store` is the only module that talks SQL.
//!   - `budget_loader` + `projections` compute pacing and projections.
//!   - `settings_writer`, `autopilot_*` rebalance CPC and daily budgets.
//!   - `monitor` + `audit_subsystem` detect anomalies.
//!   - `engine` runs the registered subsystems once per day.

pub mod audit_subsystem;
pub mod autopilot_budget;
pub mod autopilot_cpc;
pub mod autopilot_subsystem;
pub mod budget_loader;
pub mod clock;
pub mod command;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod event;
pub mod monitor;
pub mod notification;
pub mod projections;
pub mod rng;
pub mod settings_writer;
pub mod store;
pub mod subsystem;
pub mod types;
