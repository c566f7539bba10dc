//! EdgeLBClient trait for mocking
//!
//! This trait abstracts the EdgeLB API so reconciliation logic can run
//! against `MockEdgeLBClient` in unit tests.

use crate::error::EdgeLBError;
use crate::models::{Pool, PoolMetadata};

/// Trait for EdgeLB pool manager operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Cancelling a call means dropping its future; every request is additionally
/// bounded by the client's configured timeout.
#[async_trait::async_trait]
pub trait EdgeLBClientTrait: Send + Sync {
    /// Version of the EdgeLB API server
    async fn get_version(&self) -> Result<String, EdgeLBError>;

    /// All pools known to EdgeLB
    async fn get_pools(&self) -> Result<Vec<Pool>, EdgeLBError>;

    /// A single pool by name; `EdgeLBError::NotFound` if it does not exist
    async fn get_pool(&self, name: &str) -> Result<Pool, EdgeLBError>;

    /// Create a pool, returning the pool as stored by EdgeLB
    async fn create_pool(&self, pool: &Pool) -> Result<Pool, EdgeLBError>;

    /// Replace an existing pool, returning the pool as stored by EdgeLB
    async fn update_pool(&self, pool: &Pool) -> Result<Pool, EdgeLBError>;

    /// Delete a pool by name
    async fn delete_pool(&self, name: &str) -> Result<(), EdgeLBError>;

    /// Runtime metadata (frontend addresses) of a deployed pool
    async fn get_pool_metadata(&self, name: &str) -> Result<PoolMetadata, EdgeLBError>;
}
