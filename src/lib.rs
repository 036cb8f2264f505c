//! fieldroute core
//!
//! Turns a technician's daily service assignments into a shareable
//! optimized-route link on one of several mapping providers.

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod geocode;
pub mod jobboard;
pub mod matrix;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod shorten;
pub mod stop;
