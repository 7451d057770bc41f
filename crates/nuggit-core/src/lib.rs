//! # Nuggit Core
//!
//! The resource model and trigger planner shared by the Nuggit server and
//! CLI: content-addressed pipes, views, and rules; the in-memory index;
//! topological traversal; the plan trie and planner; SQL emission for
//! result collections; and the storage trait triggers are planned against.
//!
//! This crate does no filesystem or network I/O. The optional `sqlx`
//! feature only adds error classification for database errors.

pub mod action;
pub mod error;
pub mod identity;
pub mod index;
pub mod pipe;
pub mod plan;
pub mod planner;
pub mod point;
pub mod resource;
pub mod rule;
pub mod sql;
pub mod store;
pub mod topo;
pub mod trigger;
pub mod view;

pub use error::{Code, Error, Result};
pub use identity::NameDigest;
