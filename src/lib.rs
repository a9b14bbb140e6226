//! tidewatch library
//!
//! Scrapes the monthly tide table of the Mauritius Meteorological Services,
//! caches it as a JSON file and answers "tides for date D" queries for the
//! CLI and the HTTP API.

pub mod cache;
pub mod cli;
pub mod data;
pub mod display;
pub mod refresh;
pub mod server;
