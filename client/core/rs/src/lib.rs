//! Shared types for the Vigil monitoring service.
//!
//! The `entities` module holds the world model Vigil maintains for
//! monitored Proxmox instances and Docker agents, the alert
//! configuration consumed from `alerts.json`, and the server
//! configuration. The `ws` module holds the delta events streamed to
//! websocket subscribers.

pub mod entities;
pub mod ws;
