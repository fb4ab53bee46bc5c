pub mod client;
mod codec;
mod identity;
pub mod migrate;
pub mod store;
mod tasks;
mod taskhub;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use store::StateStore;
pub use taskhub::TaskWeights;

/// Re-export neo4rs::query for downstream crates that need raw Cypher access (e.g. test assertions).
pub use neo4rs::query;
