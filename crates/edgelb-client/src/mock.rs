//! Mock EdgeLBClient for unit testing
//!
//! Stores pools in memory, records every call made through
//! `EdgeLBClientTrait`, and can be told to fail specific operations.

use crate::edgelb_trait::EdgeLBClientTrait;
use crate::error::EdgeLBError;
use crate::models::{Pool, PoolMetadata};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// A call made against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOperation {
    GetVersion,
    GetPools,
    GetPool(String),
    CreatePool(String),
    UpdatePool(String),
    DeletePool(String),
    GetPoolMetadata(String),
}

impl PoolOperation {
    /// Whether the operation changes state on EdgeLB
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CreatePool(_) | Self::UpdatePool(_) | Self::DeletePool(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::GetVersion => "get_version",
            Self::GetPools => "get_pools",
            Self::GetPool(_) => "get_pool",
            Self::CreatePool(_) => "create_pool",
            Self::UpdatePool(_) => "update_pool",
            Self::DeletePool(_) => "delete_pool",
            Self::GetPoolMetadata(_) => "get_pool_metadata",
        }
    }
}

/// Mock EdgeLBClient for testing
#[derive(Clone, Default)]
pub struct MockEdgeLBClient {
    pools: Arc<Mutex<BTreeMap<String, Pool>>>,
    metadata: Arc<Mutex<HashMap<String, PoolMetadata>>>,
    calls: Arc<Mutex<Vec<PoolOperation>>>,
    failures: Arc<Mutex<HashMap<&'static str, VecDeque<EdgeLBError>>>>,
    vanishing: Arc<Mutex<HashSet<String>>>,
}

impl MockEdgeLBClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pool
    pub fn add_pool(&self, pool: Pool) {
        self.pools.lock().unwrap().insert(pool.name.clone(), pool);
    }

    /// Remove a pool behind the controller's back
    pub fn remove_pool(&self, name: &str) {
        self.pools.lock().unwrap().remove(name);
    }

    /// Current state of a pool
    pub fn pool(&self, name: &str) -> Option<Pool> {
        self.pools.lock().unwrap().get(name).cloned()
    }

    /// Names of all stored pools
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.lock().unwrap().keys().cloned().collect()
    }

    /// Seed the metadata returned for a pool
    pub fn set_metadata(&self, metadata: PoolMetadata) {
        self.metadata
            .lock()
            .unwrap()
            .insert(metadata.name.clone(), metadata);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<PoolOperation> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that changed state on EdgeLB
    pub fn mutating_calls(&self) -> Vec<PoolOperation> {
        self.calls()
            .into_iter()
            .filter(PoolOperation::is_mutating)
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make the next call of the same kind as `operation` fail with `error`.
    /// The operation's argument is ignored.
    pub fn fail_next(&self, operation: &PoolOperation, error: EdgeLBError) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation.kind())
            .or_default()
            .push_back(error);
    }

    /// Delete the pool right after the next `get_pool` for it returns,
    /// simulating a concurrent external deletion.
    pub fn delete_after_next_get(&self, name: &str) {
        self.vanishing.lock().unwrap().insert(name.to_string());
    }

    fn record(&self, operation: PoolOperation) -> Result<(), EdgeLBError> {
        let kind = operation.kind();
        self.calls.lock().unwrap().push(operation);
        match self.failures.lock().unwrap().get_mut(kind).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl EdgeLBClientTrait for MockEdgeLBClient {
    async fn get_version(&self) -> Result<String, EdgeLBError> {
        self.record(PoolOperation::GetVersion)?;
        Ok("v1.5.0".to_string())
    }

    async fn get_pools(&self) -> Result<Vec<Pool>, EdgeLBError> {
        self.record(PoolOperation::GetPools)?;
        Ok(self.pools.lock().unwrap().values().cloned().collect())
    }

    async fn get_pool(&self, name: &str) -> Result<Pool, EdgeLBError> {
        self.record(PoolOperation::GetPool(name.to_string()))?;
        let pool = self
            .pools
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EdgeLBError::NotFound(format!("pool {}", name)))?;
        if self.vanishing.lock().unwrap().remove(name) {
            self.remove_pool(name);
        }
        Ok(pool)
    }

    async fn create_pool(&self, pool: &Pool) -> Result<Pool, EdgeLBError> {
        self.record(PoolOperation::CreatePool(pool.name.clone()))?;
        let mut pools = self.pools.lock().unwrap();
        if pools.contains_key(&pool.name) {
            return Err(EdgeLBError::unknown(format!(
                "Failed to access pool {}: 409 Conflict - pool already exists",
                pool.name
            )));
        }
        pools.insert(pool.name.clone(), pool.clone());
        Ok(pool.clone())
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Pool, EdgeLBError> {
        self.record(PoolOperation::UpdatePool(pool.name.clone()))?;
        let mut pools = self.pools.lock().unwrap();
        match pools.get_mut(&pool.name) {
            Some(existing) => {
                *existing = pool.clone();
                Ok(pool.clone())
            }
            None => Err(EdgeLBError::NotFound(format!("pool {}", pool.name))),
        }
    }

    async fn delete_pool(&self, name: &str) -> Result<(), EdgeLBError> {
        self.record(PoolOperation::DeletePool(name.to_string()))?;
        match self.pools.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(EdgeLBError::NotFound(format!("pool {}", name))),
        }
    }

    async fn get_pool_metadata(&self, name: &str) -> Result<PoolMetadata, EdgeLBError> {
        self.record(PoolOperation::GetPoolMetadata(name.to_string()))?;
        self.metadata
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EdgeLBError::NotFound(format!("metadata of pool {}", name)))
    }
}
