//! The braid workspace daemon.
//!
//! One daemon per workspace serializes mutations over a Unix domain socket:
//! it owns the store, the flush manager, and the mutation bus, and answers
//! length-prefixed requests from any number of concurrent clients. The
//! `braidd` binary is a thin wrapper around [`server::Server`].

pub mod dispatch;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod server;

pub use error::DaemonError;
pub use server::Server;
