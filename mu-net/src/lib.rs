//! # mu-net
//!
//! The Broadcast Hub (C6): a WebSocket server that accepts subscriber
//! connections, re-routes acquisition frames through per-listener channel
//! masks, exposes a virtual filesystem over recorded H5 files, and runs a
//! job scheduler for unattended acquisitions.

pub mod error;
pub mod h5handler;
pub mod hub;
pub mod listener;
pub mod scheduler;
pub mod wire;

pub use error::{NetError, Result};
pub use h5handler::H5Handler;
pub use hub::BroadcastHub;
pub use listener::{Listener, ListenerId};
pub use scheduler::{JobRunner, ScheduledJob, Scheduler, TaskId};
pub use wire::{H5Command, ListenParameters, Request, Response, SchedulerCommand};
