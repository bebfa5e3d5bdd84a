//! nodescale-cloud: the provider side of the fleet.
//!
//! The control loop only ever talks to a [`CloudClient`]: list the tagged
//! nodes, create one from the node template, destroy one, and replace the
//! load balancer's member set in a single call.
//!
//! # Implementations
//!
//! - [`DigitalOceanClient`]: droplets + one load balancer over the v2 REST API
//! - [`MemoryCloud`]: deterministic in-process provider with an operation
//!   log and failure injection, used by tests and dry runs
//!
//! Transient failures (network errors, 429, 5xx) are retried with bounded
//! exponential backoff via [`with_retry`]; everything else surfaces at once.

pub mod client;
pub mod digitalocean;
pub mod error;
pub mod memory;
pub mod retry;

pub use client::{CloudClient, CloudNode};
pub use digitalocean::DigitalOceanClient;
pub use error::{CloudError, CloudResult};
pub use memory::{CloudOp, MemoryCloud};
pub use retry::{RetryPolicy, with_retry};
