//! smelltrail core library: code-smell lifespans across git history.
//!
//! The main entry point is [`graph::LifespanGraph`], a per-operation view over
//! a [`store::RelationalStore`] and a [`vcs::CommitHistoryAdapter`]. Every
//! read goes through a [`batch::RequestCoalescer`], and every list comes back
//! as a cursor-paginated [`connection::Connection`].

pub mod batch;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod graph;
pub mod import;
pub mod progress;
pub mod store;
pub mod types;
pub mod vcs;
