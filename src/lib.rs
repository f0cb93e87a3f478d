//! Graph Explorer: address-relationship analysis over a Substrate-based
//! network's transfer history.
//!
//! The service is split into four subsystems, each owned by one top-level
//! module: the upstream fetch fabric (`upstream`), the relational store and
//! graph query engine (`store`, `graph::engine`), graph assembly and pattern
//! analysis (`graph::assembler`, `analysis`), and the security/quota layer
//! (`security`, `quota`, `guard`) that wraps all of it before it reaches
//! `api`.

pub mod analysis;
pub mod api;
pub mod config;
pub mod cursor;
pub mod error;
pub mod graph;
pub mod guard;
pub mod model;
pub mod quota;
pub mod security;
pub mod store;
pub mod streaming;
pub mod upstream;
pub mod validation;

pub use config::Config;
pub use error::AppError;
