//! Integration tests for the EdgeLB client
//!
//! These tests require a running EdgeLB API server.
//! Set EDGELB_URL (and EDGELB_TOKEN if the cluster is strict) to run.

use edgelb_client::{
    Backend, BackendService, EdgeLBClient, EdgeLBClientOptions, EdgeLBClientTrait, Endpoint,
    EndpointType, Frontend, LinkBackend, MesosSelector, Pool, Protocol,
};

fn client() -> EdgeLBClient {
    let url = std::env::var("EDGELB_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());
    EdgeLBClient::new(EdgeLBClientOptions {
        base_url: url,
        token: std::env::var("EDGELB_TOKEN").ok(),
        ..Default::default()
    })
    .expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running EdgeLB instance
async fn test_get_version() {
    let version = client().get_version().await.expect("Failed to get version");
    assert!(!version.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_missing_pool_is_not_found() {
    let err = client()
        .get_pool("dklb-integration-test-missing")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_pool_lifecycle() {
    let client = client();

    let mut pool = Pool::new("dklb-integration-test");
    pool.role = "slave_public".to_string();
    pool.cpus = 0.1;
    pool.mem = 128;
    pool.count = 1;
    pool.haproxy.backends.push(Backend {
        name: "echo".to_string(),
        protocol: Protocol::Tcp,
        balance: Some("roundrobin".to_string()),
        services: vec![BackendService {
            mesos: Some(MesosSelector {
                framework_name: Some("kubernetes-cluster".to_string()),
                task_name_pattern: Some("^kube-node-.*$".to_string()),
                ..Default::default()
            }),
            endpoint: Endpoint {
                kind: EndpointType::AutoIp,
                port: Some(30080),
                ..Default::default()
            },
            ..Default::default()
        }],
        extra: Default::default(),
    });
    pool.haproxy.frontends.push(Frontend {
        name: "echo".to_string(),
        bind_address: None,
        bind_port: 10080,
        protocol: Protocol::Tcp,
        certificates: Vec::new(),
        redirect_to_https: None,
        link_backend: LinkBackend {
            default_backend: Some("echo".to_string()),
            ..Default::default()
        },
        extra: Default::default(),
    });

    client.create_pool(&pool).await.expect("Failed to create pool");
    let stored = client.get_pool(&pool.name).await.expect("Failed to get pool");
    assert_eq!(stored.haproxy.frontends.len(), 1);

    client.delete_pool(&pool.name).await.expect("Failed to delete pool");
}
