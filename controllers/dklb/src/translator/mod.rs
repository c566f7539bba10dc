//! Translation of Ingresses and Services into EdgeLB pools.
//!
//! Several objects may target the same pool. Each one owns the frontends and
//! backends whose names start with its [`Owner`] prefix and only ever
//! touches those. Pool-level sizing follows the only contributor;
//! in a shared pool it is the largest any contributor asked for.
//!
//! Every pass issues at most one mutating EdgeLB call, except when a pool
//! vanishes between being read and being updated and has to be recreated.

pub mod ingress;
pub mod service;
pub mod status;


use crate::config::{Config, RecreationPolicy};
use crate::error::ControllerError;
use dklb_spec::{CreationStrategy, PoolRecord, PoolSpec, check_immutable};
use edgelb_client::retry::{RetryError, with_timeout};
use edgelb_client::{
    Backend, BackendService, EdgeLBClientTrait, Endpoint, EndpointType, Frontend, MesosSelector,
    Pool, VirtualNetwork,
};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Task name pattern of the Kubernetes nodes backing every pool
pub const KUBE_NODE_TASK_PATTERN: &str = "^kube-node-.*$";

const RECREATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Kind of object contributing to a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ingress,
    Service,
}

impl SourceKind {
    fn short(self) -> &'static str {
        match self {
            Self::Ingress => "ing",
            Self::Service => "svc",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => f.write_str("Ingress"),
            Self::Service => f.write_str("Service"),
        }
    }
}

/// Identifies the pool entries belonging to one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    prefix: String,
}

impl Owner {
    pub fn new(kind: SourceKind, cluster_name: &str, namespace: &str, name: &str) -> Self {
        Self {
            prefix: format!(
                "{}:{}:{}:{}:",
                cluster_name.replace('/', "."),
                kind.short(),
                namespace,
                name
            ),
        }
    }

    /// Name of an owned frontend or backend
    pub fn entry_name(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    pub fn owns(&self, entry_name: &str) -> bool {
        entry_name.starts_with(&self.prefix)
    }
}

/// What one object wants to see in its pool
#[derive(Debug, Clone)]
pub struct Contribution {
    pub owner: Owner,
    pub spec: PoolSpec,
    pub frontends: Vec<Frontend>,
    pub backends: Vec<Backend>,
}

impl Contribution {
    /// The pool this contribution would create on its own
    fn desired_pool(&self) -> Pool {
        let mut pool = Pool::new(self.spec.name.clone());
        pool.role = self.spec.role.clone();
        pool.virtual_networks = self
            .spec
            .network
            .iter()
            .map(|name| VirtualNetwork {
                name: name.clone(),
                ..Default::default()
            })
            .collect();
        apply_sizing(&mut pool, &self.spec);
        pool.haproxy.frontends = self.frontends.clone();
        pool.haproxy.backends = self.backends.clone();
        pool.normalized()
    }

    /// `observed` with this contribution's entries replaced
    fn merge_into(&self, observed: &Pool) -> Pool {
        if observed.role != self.spec.role || observed.network() != self.spec.network.as_deref() {
            warn!(
                "Pool {} runs with role {:?} on network {:?}; keeping them instead of {:?} on {:?}",
                observed.name,
                observed.role,
                observed.network(),
                self.spec.role,
                self.spec.network
            );
        }
        let mut pool = strip(observed, &self.owner);
        if pool.is_empty() {
            apply_sizing(&mut pool, &self.spec);
        } else {
            share_sizing(&mut pool, &self.spec);
        }
        pool.haproxy.frontends.extend(self.frontends.iter().map(|frontend| {
            let mut frontend = frontend.clone();
            if let Some(seen) = observed.haproxy.frontends.iter().find(|f| f.name == frontend.name) {
                keep_server_fields_of_frontend(&mut frontend, seen);
            }
            frontend
        }));
        pool.haproxy.backends.extend(self.backends.iter().map(|backend| {
            let mut backend = backend.clone();
            if let Some(seen) = observed.haproxy.backends.iter().find(|b| b.name == backend.name) {
                keep_server_fields_of_backend(&mut backend, seen);
            }
            backend
        }));
        pool.normalized()
    }
}

/// Copy fields dklb does not model from `observed` into `target`.
///
/// EdgeLB fills in defaults for settings dklb never writes; without these
/// the desired entries would never compare equal to the stored ones.
fn keep_unmodelled(target: &mut Map<String, Value>, observed: &Map<String, Value>) {
    for (key, value) in observed {
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

fn keep_server_fields_of_frontend(frontend: &mut Frontend, observed: &Frontend) {
    keep_unmodelled(&mut frontend.extra, &observed.extra);
    keep_unmodelled(&mut frontend.link_backend.extra, &observed.link_backend.extra);
    for (mapping, seen) in frontend.link_backend.map.iter_mut().zip(&observed.link_backend.map) {
        if mapping.backend == seen.backend {
            keep_unmodelled(&mut mapping.extra, &seen.extra);
        }
    }
    if let (Some(redirect), Some(seen)) = (frontend.redirect_to_https.as_mut(), &observed.redirect_to_https) {
        keep_unmodelled(&mut redirect.extra, &seen.extra);
    }
}

fn keep_server_fields_of_backend(backend: &mut Backend, observed: &Backend) {
    keep_unmodelled(&mut backend.extra, &observed.extra);
    for (service, seen) in backend.services.iter_mut().zip(&observed.services) {
        keep_unmodelled(&mut service.extra, &seen.extra);
        keep_unmodelled(&mut service.endpoint.extra, &seen.endpoint.extra);
        if let (Some(mesos), Some(seen_mesos)) = (service.mesos.as_mut(), &seen.mesos) {
            keep_unmodelled(&mut mesos.extra, &seen_mesos.extra);
        }
    }
}

fn apply_sizing(pool: &mut Pool, spec: &PoolSpec) {
    pool.cpus = spec.cpus;
    pool.mem = spec.memory;
    pool.count = spec.size;
    pool.constraints = spec.constraints.clone();
}

/// Sizing of a pool other entries also live in: each value only grows and
/// existing constraints stay, so sharers with different specs converge
/// instead of overwriting each other on every pass.
fn share_sizing(pool: &mut Pool, spec: &PoolSpec) {
    if pool.cpus != spec.cpus || pool.mem != spec.memory || pool.count != spec.size {
        debug!(
            "Pool {} is shared; sizing {} cpus, {} MiB, {} instances is merged with {} cpus, {} MiB, {} instances",
            pool.name, pool.cpus, pool.mem, pool.count, spec.cpus, spec.memory, spec.size
        );
    }
    pool.cpus = pool.cpus.max(spec.cpus);
    pool.mem = pool.mem.max(spec.memory);
    pool.count = pool.count.max(spec.size);
    if pool.constraints.is_none() {
        pool.constraints = spec.constraints.clone();
    }
}

/// `pool` without the entries of `owner`, normalized
fn strip(pool: &Pool, owner: &Owner) -> Pool {
    let mut pool = pool.clone();
    pool.haproxy.frontends.retain(|f| !owner.owns(&f.name));
    pool.haproxy.backends.retain(|b| !owner.owns(&b.name));
    pool.normalized()
}

/// Backend target for a Kubernetes node port
pub fn node_port_service(config: &Config, node_port: i32) -> BackendService {
    BackendService {
        mesos: Some(MesosSelector {
            framework_name: Some(config.backend_framework_name.clone()),
            task_name_pattern: Some(KUBE_NODE_TASK_PATTERN.to_string()),
            ..Default::default()
        }),
        endpoint: Endpoint {
            kind: EndpointType::AutoIp,
            port: Some(node_port),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Outcome of a translation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolAction {
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// The pool is missing and the creation strategy forbids creating it
    NotCreated(CreationStrategy),
    /// Nothing to release: the pool does not exist
    Absent,
}

impl PoolAction {
    /// Whether the pool now carries the contribution
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Unchanged)
    }
}

/// Applies contributions to EdgeLB pools
pub struct Translator {
    client: Arc<dyn EdgeLBClientTrait>,
    config: Arc<Config>,
}

impl Translator {
    pub fn new(client: Arc<dyn EdgeLBClientTrait>, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// Make the pool carry `contribution`.
    ///
    /// `record` is the pool the object was last applied to, if any.
    pub async fn apply(
        &self,
        contribution: &Contribution,
        record: Option<&PoolRecord>,
    ) -> Result<PoolAction, ControllerError> {
        if let Some(record) = record {
            check_immutable(&record.identity(), &contribution.spec.identity())?;
        }

        let name = &contribution.spec.name;
        let observed = match self.client.get_pool(name).await {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => {
                debug!("Pool {} does not exist", name);
                return self.create(contribution.desired_pool(), contribution, record).await;
            }
            Err(e) => return Err(e.into()),
        };

        let merged = contribution.merge_into(&observed);
        if merged == observed.normalized() {
            debug!("Pool {} is up to date", name);
            return Ok(PoolAction::Unchanged);
        }

        match self.client.update_pool(&merged).await {
            Ok(_) => {
                info!("Updated pool {}", name);
                Ok(PoolAction::Updated)
            }
            Err(e) if e.is_not_found() => {
                warn!("Pool {} disappeared before it could be updated", name);
                self.recreate(merged, contribution, record).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove everything `owner` contributed to the pool, deleting the pool
    /// once nothing is left in it.
    pub async fn release(&self, pool_name: &str, owner: &Owner) -> Result<PoolAction, ControllerError> {
        let observed = match self.client.get_pool(pool_name).await {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => return Ok(PoolAction::Absent),
            Err(e) => return Err(e.into()),
        };

        let remaining = strip(&observed, owner);
        if remaining == observed.normalized() {
            return Ok(PoolAction::Unchanged);
        }

        if remaining.is_empty() {
            return match self.client.delete_pool(pool_name).await {
                Ok(()) => {
                    info!("Deleted pool {}", pool_name);
                    Ok(PoolAction::Deleted)
                }
                Err(e) if e.is_not_found() => Ok(PoolAction::Absent),
                Err(e) => Err(e.into()),
            };
        }

        match self.client.update_pool(&remaining).await {
            Ok(_) => {
                info!("Removed {} entries from pool {}", owner.prefix, pool_name);
                Ok(PoolAction::Updated)
            }
            Err(e) if e.is_not_found() => Ok(PoolAction::Absent),
            Err(e) => Err(e.into()),
        }
    }

    /// Public (or else private) addresses of `owner`'s frontends
    pub async fn frontend_addresses(
        &self,
        pool_name: &str,
        owner: &Owner,
    ) -> Result<Vec<String>, ControllerError> {
        match self.client.get_pool_metadata(pool_name).await {
            Ok(metadata) => Ok(status::frontend_addresses(&metadata, owner)),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(
        &self,
        pool: Pool,
        contribution: &Contribution,
        record: Option<&PoolRecord>,
    ) -> Result<PoolAction, ControllerError> {
        let strategy = contribution.spec.creation_strategy;
        match strategy {
            CreationStrategy::IfNotPresent => {}
            CreationStrategy::Once if record.is_none() => {}
            CreationStrategy::Once | CreationStrategy::Never => {
                info!(
                    "Not creating pool {} (creation strategy {})",
                    pool.name, strategy
                );
                return Ok(PoolAction::NotCreated(strategy));
            }
        }

        self.client.create_pool(&pool).await?;
        info!("Created pool {}", pool.name);
        Ok(PoolAction::Created)
    }

    async fn recreate(
        &self,
        pool: Pool,
        contribution: &Contribution,
        record: Option<&PoolRecord>,
    ) -> Result<PoolAction, ControllerError> {
        if self.config.recreation_policy == RecreationPolicy::WhenGone {
            let client = Arc::clone(&self.client);
            let name = pool.name.clone();
            let gone = with_timeout(self.config.recreation_timeout, RECREATION_POLL_INTERVAL, || {
                let client = Arc::clone(&client);
                let name = name.clone();
                async move {
                    match client.get_pool(&name).await {
                        Ok(_) => Ok(false),
                        Err(e) if e.is_not_found() => Ok(true),
                        Err(e) => Err(e),
                    }
                }
            })
            .await;
            match gone {
                Ok(()) => {}
                Err(RetryError::Timeout(after)) => {
                    return Err(ControllerError::Recreation(format!(
                        "pool {} still exists after {:?}",
                        name, after
                    )));
                }
                Err(RetryError::Condition(e)) => return Err(e.into()),
            }
        }

        self.create(pool, contribution, record).await
    }
}
