//! Dispatch incident loader
//!
//! Pulls dispatch events from the open-data API, geocodes each address and
//! stores the rows in PostgreSQL, skipping events that are already stored.

pub mod cli;
pub mod config;
pub mod database;
pub mod errors;
pub mod geocoder;
pub mod http;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod open_data;
pub mod pipeline;
