//! dimgraph-core library.
//!
//! An event-sourced content graph whose nodes vary across configurable
//! dimensions, with git-like content streams and checkpointed projections.
//!
//! # Layout
//!
//! - [`dimension`]: dimension space points and the variation graph
//! - [`model`]: ids, node types and property values
//! - [`event`], [`store`]: domain events and the append-only event store
//! - [`command`]: validation of commands into event batches
//! - [`graph`]: the materialized content graph and its structure checks
//! - [`projection`], [`subscription`]: read models and the catch-up engine
//! - [`repository`], [`workspace`]: the facade tying it all together
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums; `anyhow::Result` only where files
//!   are opened.
//! - **Logging**: `tracing` macros with structured fields.

pub mod command;
pub mod config;
pub mod db;
pub mod dimension;
pub mod error;
pub mod event;
pub mod graph;
pub mod lock;
pub mod model;
pub mod projection;
pub mod repository;
pub mod store;
pub mod subscription;
pub mod workspace;

pub use command::{Command, CommandError};
pub use config::{ContentModel, RepositoryConfig};
pub use repository::ContentRepository;
pub use workspace::{RebaseStrategy, WorkspaceManager};
