//! Top-level wiring.
//!
//! One informer per watched kind feeds a shared cache and the event handlers;
//! the Ingress and Service controllers drain their own queues; the admission
//! webhook runs alongside. Everything stops together: the first task to exit
//! cancels the rest.

use crate::admission;
use crate::backoff::ExponentialBackoff;
use crate::cache::{KubeCache, ResourceCache};
use crate::config::Config;
use crate::engine::{CacheSync, GenericController};
use crate::error::ControllerError;
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::reconciler::Context;
use crate::reconciler::ingress::{IngressEventHandler, IngressReconciler, ServiceFanout};
use crate::reconciler::service::{ServiceEventHandler, ServiceReconciler};
use crate::translator::Translator;
use crate::watcher::Informer;
use crate::workqueue::WorkQueue;
use crate::writer::{KubeClusterWriter, KubeWriter};
use edgelb_client::{EdgeLBClient, EdgeLBClientOptions, EdgeLBClientTrait};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The running dklb instance
pub struct Controller {
    config: Arc<Config>,
    ingress_informer: Informer<Ingress>,
    service_informer: Informer<Service>,
    secret_informer: Informer<Secret>,
    ingress_controller: GenericController<IngressReconciler>,
    service_controller: GenericController<ServiceReconciler>,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let config = Arc::new(config);
        let client = Client::try_default().await?;

        let edgelb: Arc<dyn EdgeLBClientTrait> = Arc::new(EdgeLBClient::new(EdgeLBClientOptions {
            base_url: config.edgelb.url.clone(),
            token: config.edgelb.token.clone(),
            insecure_skip_tls_verify: config.edgelb.insecure_skip_tls_verify,
            timeout: config.edgelb.request_timeout,
        })?);

        let mut ingress_informer = Informer::new(
            "Ingress",
            api(&client, config.watch_namespace.as_deref()),
            config.resync_period,
        );
        let mut service_informer = Informer::new(
            "Service",
            api(&client, config.watch_namespace.as_deref()),
            config.resync_period,
        );
        let secret_informer = Informer::new(
            "Secret",
            api(&client, config.watch_namespace.as_deref()),
            None,
        );

        let cache = Arc::new(KubeCache::new(
            (ingress_informer.store(), ingress_informer.synced()),
            (service_informer.store(), service_informer.synced()),
            (secret_informer.store(), secret_informer.synced()),
        ));

        let ctx = Arc::new(Context {
            cache: Arc::clone(&cache) as Arc<dyn ResourceCache>,
            translator: Arc::new(Translator::new(edgelb, Arc::clone(&config))),
            writer: Arc::new(KubeClusterWriter::new(client.clone())) as Arc<dyn KubeWriter>,
            events: Arc::new(KubeEventPublisher::new(client)) as Arc<dyn EventPublisher>,
            config: Arc::clone(&config),
        });

        let backoff = ExponentialBackoff::new(config.backoff_base, config.backoff_max);
        let ingress_queue = WorkQueue::new("ingresses", backoff);
        let service_queue = WorkQueue::new("services", backoff);

        ingress_informer.add_handler(Arc::new(IngressEventHandler::new(ingress_queue.clone())));
        service_informer.add_handler(Arc::new(ServiceEventHandler::new(service_queue.clone())));
        service_informer.add_handler(Arc::new(ServiceFanout::new(
            ingress_queue.clone(),
            Arc::clone(&cache) as Arc<dyn ResourceCache>,
        )));

        let caches = vec![Arc::clone(&cache) as Arc<dyn CacheSync>];
        let ingress_controller = GenericController::new(
            "ingress",
            ingress_queue,
            Arc::new(IngressReconciler::new(Arc::clone(&ctx))),
            config.ingress_workers,
            caches.clone(),
        );
        let service_controller = GenericController::new(
            "service",
            service_queue,
            Arc::new(ServiceReconciler::new(ctx)),
            config.service_workers,
            caches,
        );

        Ok(Self {
            config,
            ingress_informer,
            service_informer,
            secret_informer,
            ingress_controller,
            service_controller,
        })
    }

    /// Run until `cancel` fires or any component fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ControllerError> {
        info!(cluster = %self.config.cluster_name, "dklb controller running");

        let mut tasks = JoinSet::new();
        spawn(&mut tasks, "Ingress informer", self.ingress_informer.run(cancel.clone()));
        spawn(&mut tasks, "Service informer", self.service_informer.run(cancel.clone()));
        spawn(&mut tasks, "Secret informer", self.secret_informer.run(cancel.clone()));

        let ingress_controller = self.ingress_controller;
        let token = cancel.clone();
        spawn(&mut tasks, "Ingress controller", async move {
            ingress_controller.run(token).await
        });
        let service_controller = self.service_controller;
        let token = cancel.clone();
        spawn(&mut tasks, "Service controller", async move {
            service_controller.run(token).await
        });

        match self.config.admission_addr {
            Some(addr) => spawn(
                &mut tasks,
                "Admission webhook",
                admission::serve(addr, Arc::clone(&self.config), cancel.clone()),
            ),
            None => info!("Admission webhook disabled"),
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let e = match joined {
                Ok((name, Ok(()))) if cancel.is_cancelled() => {
                    info!("{} stopped", name);
                    continue;
                }
                Ok((name, Ok(()))) => ControllerError::Watch(format!("{} exited unexpectedly", name)),
                Ok((name, Err(e))) => ControllerError::Watch(format!("{} failed: {}", name, e)),
                Err(e) => ControllerError::Watch(format!("task panicked: {}", e)),
            };
            error!("{}", e);
            failure.get_or_insert(e);
            cancel.cancel();
        }

        info!("dklb controller stopped");
        failure.map_or(Ok(()), Err)
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn spawn<F>(tasks: &mut JoinSet<(&'static str, Result<(), ControllerError>)>, name: &'static str, fut: F)
where
    F: Future<Output = Result<(), ControllerError>> + Send + 'static,
{
    tasks.spawn(async move { (name, fut.await) });
}
