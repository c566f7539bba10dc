//! EdgeLB Pool Manager Client
//!
//! A Rust client library for the EdgeLB API. EdgeLB runs HAProxy-based load
//! balancer pools on DC/OS; this crate manages those pools over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use edgelb_client::{EdgeLBClient, EdgeLBClientOptions, EdgeLBClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = EdgeLBClient::new(EdgeLBClientOptions {
//!     base_url: "http://edgelb-api.marathon.l4lb.thisdcos.directory".to_string(),
//!     ..Default::default()
//! })?;
//!
//! let version = client.get_version().await?;
//! let pools = client.get_pools().await?;
//! println!("EdgeLB {} manages {} pools", version, pools.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Pool CRUD**: create, read, update and delete EdgeLB V2 pools
//! - **Pool metadata**: frontend addresses reported by running pools
//! - **Typed errors**: `NotFound` is distinguishable from everything else
//! - **Polling**: `retry::with_timeout` waits for a condition to hold

pub mod client;
pub mod error;
pub mod models;
pub mod retry;
#[path = "trait.rs"]
pub mod edgelb_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{EdgeLBClient, EdgeLBClientOptions};
pub use error::EdgeLBError;
pub use models::*;
pub use edgelb_trait::EdgeLBClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEdgeLBClient, PoolOperation};
