//! Horizontal partitioning support.
//!
//! A shard is an independent database instance holding a disjoint slice of
//! the dataset. The [`ShardDirectory`] enumerates shard keys and resolves
//! them to connection strings; the [`ConnectionRouter`] turns a shard key
//! into a live connection pool. With sharding disabled both collapse to a
//! single implicit "master" shard.

mod directory;
mod router;

pub use directory::{ShardDirectory, MASTER_SHARD_KEY};
pub use router::ConnectionRouter;
