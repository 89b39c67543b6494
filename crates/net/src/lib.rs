//! driftdb-net: the JSON-over-HTTP transport.
//!
//! Bridges the domain logic in `driftdb-kv` to the wire: an axum router
//! for the client, internal, and debug endpoints, and a reqwest-based
//! client implementing the `ReplicaClient` trait.

pub mod client;
pub mod messages;
pub mod replica_client;
pub mod server;

pub use client::{HttpClient, NetError};
pub use replica_client::HttpReplicaClient;
pub use server::{build_router, AppState, PersistInfo};
