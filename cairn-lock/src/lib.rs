//! Distributed Redis-powered lock.
//!
//! The Redlock algorithm provides a mutually-exclusive locking primitive
//! across threads, processes, and machines, without a single point of
//! failure: a fencing token is planted on a majority of independent masters
//! with a lease, and only the token holder can release or extend it.

pub mod config;
pub mod guard;
pub mod redlock;

pub use config::RedlockConfig;
pub use guard::RedlockGuard;
pub use redlock::Redlock;
