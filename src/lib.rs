//! An API for verifying vLEI Engagement Context Role (ECR) credential
//! presentations and answering, for any AID, whether it is currently an
//! authorized report submitter.
//!
//! Holders present a CESR-encoded ECR credential; the service validates the
//! claimed content address synchronously, verifies the chain of trust and
//! revocation state asynchronously against key-state infrastructure, and
//! exposes the resulting authorization decision for polling. Credentials
//! accepted once are re-checked for revocation for as long as the service
//! runs, so an authorization can lapse without any new presentation.
//!
//! # Design
//!
//! The library is architected around a [`Verifier`] service type, generic
//! over a [`provider::Provider`] through which implementors wire externals:
//! durable keyed storage and the trust oracle performing chain resolution.
//! Request-facing operations are methods of [`Verifier`]; verification runs
//! on a background worker pool the service manages itself.
//!
//! Intake deliberately reports nothing beyond "accepted": callers learn an
//! outcome only by polling, so a presentation response can never leak
//! verification timing or results.
//!
//! # Example
//!
//! The ready-made axum surface in [`http`] maps the service onto the wire:
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = VerifierConfig::from_json(&std::fs::read("verifier.json")?)?;
//!     let verifier = Arc::new(Verifier::new(provider, config).await?);
//!
//!     let listener = TcpListener::bind("0.0.0.0:7676").await?;
//!     axum::serve(listener, http::router(verifier)).await?;
//!     Ok(())
//! }
//! ```

mod authorize;
pub mod config;
pub mod credential;
mod error;
pub mod http;
mod present;
pub mod provider;
mod report;
pub mod state;
mod store;
pub mod test_utils;
mod worker;

use std::sync::Arc;

pub use crate::authorize::Authorization;
pub use crate::config::VerifierConfig;
pub use crate::error::{Error, Result};
pub use crate::report::{ReportStats, ReportStatus};

/// The verification service: intake, queries, and the background
/// verification machinery, over provider-supplied externals.
pub struct Verifier<P: provider::Provider> {
    provider: P,
    workers: worker::Workers,
}

impl<P: provider::Provider + Send + Sync + 'static> Verifier<P> {
    /// Start the service: validate configuration, recover any work left
    /// in-flight by a previous run, and spawn the verification workers,
    /// revocation sweep, and report verifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an unusable configuration and
    /// `Error::ServerError` if recovery cannot read the store.
    pub async fn new(provider: P, config: VerifierConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let workers = worker::Workers::spawn(provider.clone(), Arc::clone(&config)).await?;
        report::spawn_verifier(provider.clone(), config, workers.shutdown_rx());

        Ok(Self { provider, workers })
    }

    /// Signal the background tasks to stop. In-flight oracle consultations
    /// are not interrupted; interrupted work is recovered on next start.
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}
