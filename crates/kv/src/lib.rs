//! Dynamo-style replication layer: consistent-hash placement, quorum
//! coordination with sloppy-quorum fallback and read repair, durable
//! hinted handoff, and the anti-entropy pull loop.

pub mod anti_entropy;
pub mod chaos;
pub mod coordinator;
pub mod hint_delivery;
pub mod hints;
pub mod replica_client;
pub mod ring;
