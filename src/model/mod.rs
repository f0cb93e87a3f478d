//! Domain types shared by the store, graph engine, and API layers.

pub mod account;
pub mod address;
pub mod graph;
pub mod transfer;

pub use account::{Account, Identity, RiskLevel};
pub use address::Address;
pub use graph::{GraphEdge, GraphMetadata, GraphNode, GraphPayload};
pub use transfer::{AccountStats, Transfer, TransferStats};
