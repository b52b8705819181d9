//! Courier: a single-process instant-messaging backend.
//!
//! One TCP listener serves two wire protocols, auto-detected per connection:
//! HTTP/1.1 for static content and the legacy form login flow, and a
//! length-prefixed binary envelope protocol for IM operations (register,
//! login, friend graph, peer-to-peer messaging with offline sync).
//!
//! The I/O core is a single-threaded epoll reactor with one-shot re-arming;
//! read/write work runs on a fixed worker pool. Push delivery fans out through
//! per-connection lock-free outbound queues, message persistence goes through
//! a batching background writer, and logging through an async rolling-file
//! pipeline. Linux only.

pub mod blockdeque;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod conn;
pub mod error;
pub mod http;
pub mod logging;
pub mod mpsc;
pub mod msg_writer;
pub mod proto;
pub mod reactor;
pub mod server;
pub mod service;
pub mod store;
pub mod timer;
pub mod token;
pub mod workers;

pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
