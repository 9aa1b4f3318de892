//! # megamicro
//!
//! The Session Coordinator (C8): ties the transfer engine, persistence,
//! broadcast hub, and video sidecar together behind the `run`/`stop`/`wait`
//! API a server process or a demo binary drives directly.

pub mod config;
pub mod error;
pub mod params;
pub mod session;

pub use config::Config;
pub use error::{Result, SessionError};
pub use params::SessionParams;
pub use session::Session;
