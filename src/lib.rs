//! The main library for the tutoring points platform.
//!
//! Tutors manage students, events, and a points-based reward store; students
//! join events, earn points, and redeem rewards; admins approve registrations
//! and manage global events. The stateful core is the redemption approval
//! workflow in [`points`], a single-transaction state machine over the
//! request ledger, inventory, and balances.

pub mod api;
pub mod auth;
pub mod authz;
pub mod classroom;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod points;
pub mod responses;
pub mod roster;

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

pub use api::{AppState, init_router};
pub use config::Config;

/// Initializes the database pool, creating the database file if missing.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("Failed to open SQLite database")?;
    Ok(pool)
}
