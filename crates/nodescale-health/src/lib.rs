//! nodescale-health: asks each node how busy it is.
//!
//! Every node runs a small agent answering `POST /api/health` with its CPU
//! usage. Requests carry a short-lived HS256 token signed with the shared
//! service key, so only the scaler can query agents.
//!
//! A probe never fails: timeouts, refused connections, bad status codes and
//! malformed bodies all produce a [`HealthSample`] with `ok = false`.
//!
//! [`HealthSample`]: nodescale_core::HealthSample

pub mod error;
pub mod prober;
pub mod round;
pub mod scripted;
pub mod signer;

pub use error::HealthError;
pub use prober::{HealthProbe, HttpProber, parse_health_body};
pub use round::{ProbeTarget, probe_round};
pub use scripted::ScriptedProbe;
pub use signer::TokenSigner;
