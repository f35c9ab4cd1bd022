//! HTTP handlers for the relay

pub mod socket;

pub use crate::config::AppState;
pub use socket::{authorize_connect, close_channel, open_channel, ws_upgrade};
