//! # Nuggit
//!
//! Content-addressed scraping pipes, the views that collect their results,
//! and the URL rules that trigger them.
//!
//! Resources are declared in YAML or JSON, indexed and qualified by
//! [`nuggit_core`], and persisted here in SQLite. A trigger request for a
//! URL plans every matching pipe into one shared plan; clients run the
//! plan in the page and report results back through the exchange
//! endpoint, which fills the view collections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Resources  │──▶│ Index+Qual. │──▶│    SQLite    │
//! │  YAML/JSON  │   │ nuggit-core │   │ pipes, rules │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │ (nuggit) │       │  (axum)  │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Pipe storage and rule matching |
//! | [`resources`] | Resource persistence |
//! | [`rules`] | Trigger rule persistence |
//! | [`views`] | Views and their collections |
//! | [`results`] | Result exchange |
//! | [`loader`] | Loading resource files from disk |
//! | [`server`] | JSON HTTP API |
//! | [`sum`] | File checksums |

pub mod config;
pub mod db;
pub mod loader;
pub mod migrate;
pub mod resources;
pub mod results;
pub mod rules;
pub mod server;
pub mod sqlite_store;
pub mod sum;
pub mod views;
