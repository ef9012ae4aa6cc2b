//! JS8Call directed message recorder
//!
//! Connects to the JS8Call TCP API, keeps the directed messages addressed to
//! the operator and the grid locators of every station heard, and stores both
//! in SQLite.

pub mod config;
pub mod database;
pub mod errors;
pub mod grid;
pub mod js8;
pub mod models;
pub mod session;
