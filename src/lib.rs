//! Live fleet tracking: polled vehicle snapshots reconciled into per-vehicle
//! state, great-circle ETAs, and throttled reporting of this device's own
//! position.

pub mod client;
pub mod config;
pub mod error;
pub mod gc;
pub mod geo;
pub mod layer;
pub mod notifications;
pub mod poller;
pub mod processor;
pub mod reporter;
pub mod sensor;
pub mod state;

pub use error::{Error, Result, SensorError};
