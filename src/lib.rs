//! Backend library that links external music accounts (Spotify, Apple Music,
//! YouTube Music, Google) to one internal user identity and exposes unified
//! playlist and profile operations across providers. Consumed by HTTP route
//! handlers; no routing or wire surface of its own.

pub mod cache;
pub mod config;
pub mod database;
pub mod entities;
pub mod error;
pub mod logging;
pub mod ports;
pub mod provider;
pub mod services;
pub mod store;
pub mod utils;

#[cfg(test)]
pub mod test_utils;
