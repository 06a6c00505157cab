//! on3demand: a demand-based GPU frequency governor.
//!
//! The governor raises the GPU to maximum frequency at activity onset or
//! under high load, scales down proportionally after sustained low load and
//! drops to minimum once the GPU has been idle for a whole poll interval.

pub mod activity;
pub mod attributes;
pub mod backend;
pub mod config;
pub mod delayed_work;
pub mod error;
pub mod framework;
pub mod governor;
pub mod ipc_server;
pub mod logging;
pub mod metrics;
pub mod sysfs;
pub mod tunables;
