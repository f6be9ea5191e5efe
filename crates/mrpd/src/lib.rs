//! Linux host for the MRP engine
//!
//! Runs the ring and interconnection state machines of the `mrp` crate on
//! a Linux bridge: configuration from YAML, frames over raw sockets, port
//! blocking through the bridge port state set over route netlink.

pub mod config;
pub mod messages;
pub mod netlink;
pub mod platform;
pub mod server;

pub use config::{Config, ConfigError};
pub use server::Daemon;
