//! # Report Submission
//!
//! Upload and status tracking for reports submitted by authorized AIDs.
//! Uploads are accepted with minimal checking and stored in fixed-size
//! chunks; a background verifier recomputes the content digest against the
//! claimed one and checks the submitter's detached signature through the
//! trust oracle, moving the report from `Accepted` to `Verified` or
//! `Failed`. Clients poll the status endpoint, as with authorizations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

use crate::config::VerifierConfig;
use crate::credential;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::{Verifier, store};

/// Upload chunk size in bytes.
const CHUNK_SIZE: usize = 4096;

/// Verification status of an uploaded report.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Accepted at upload, waiting for verification.
    #[default]
    Accepted,

    /// Content digest and submitter signature verified.
    Verified,

    /// Digest mismatch or signature failure; see the status message.
    Failed,
}

/// Status record for an uploaded report.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReportStats {
    /// Digest of the report content, as claimed at upload.
    pub digest: String,

    /// AID of the uploader.
    pub submitter: String,

    /// Filename reported at upload.
    pub filename: String,

    /// Current verification status.
    pub status: ReportStatus,

    /// Content type reported at upload.
    pub content_type: String,

    /// Size of the uploaded content in bytes.
    pub size: u64,

    /// Status message, populated on verification.
    pub message: String,
}

impl<P: Provider> Verifier<P> {
    /// Accept a report upload from a currently-authorized AID.
    ///
    /// The content is stored with an `Accepted` status record and queued for
    /// background verification; re-uploading under the same digest replaces
    /// the previous content and resets its status.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound`/`Error::Unauthorized` when the AID is not
    /// currently authorized, and `Error::ServerError` on storage faults.
    #[instrument(level = "debug", skip(self, content, signature))]
    pub async fn upload_report(
        &self, aid: &str, dig: &str, filename: &str, content_type: &str, content: &[u8],
        signature: &str,
    ) -> Result<()> {
        self.require_authorized(aid).await?;

        store::put_report_chunks(&self.provider, dig, content, CHUNK_SIZE).await?;
        store::put_report_signature(&self.provider, dig, signature).await?;

        let stats = ReportStats {
            digest: dig.to_string(),
            submitter: aid.to_string(),
            filename: filename.to_string(),
            status: ReportStatus::Accepted,
            content_type: content_type.to_string(),
            size: content.len() as u64,
            message: String::new(),
        };
        store::put_report_stats(&self.provider, &stats).await?;

        tracing::debug!("report {dig} ({} bytes) accepted from {aid}", content.len());
        Ok(())
    }

    /// Status of a previously uploaded report, for a currently-authorized
    /// AID.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown report or AID, and
    /// `Error::Unauthorized` when the AID is not currently authorized.
    #[instrument(level = "debug", skip(self))]
    pub async fn report_status(&self, aid: &str, dig: &str) -> Result<ReportStats> {
        self.require_authorized(aid).await?;

        store::get_report_stats(&self.provider, dig)
            .await?
            .ok_or_else(|| Error::NotFound(format!("report {dig} not found")))
    }
}

/// Start the background report verifier.
pub(crate) fn spawn_verifier<P>(
    provider: P, config: Arc<VerifierConfig>, mut shutdown: watch::Receiver<bool>,
) where
    P: Provider + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = verify_accepted(&provider).await {
                        tracing::warn!("report verification pass failed: {e}");
                    }
                }
            }
        }
    });
}

/// Verify every report currently in `Accepted` status.
async fn verify_accepted<P: Provider>(provider: &P) -> Result<()> {
    for stats in store::all_report_stats(provider).await? {
        if stats.status != ReportStatus::Accepted {
            continue;
        }
        // a fault on one report is isolated
        if let Err(e) = verify_one(provider, stats.clone()).await {
            tracing::warn!("error verifying report {}: {e}", stats.digest);
        }
    }
    Ok(())
}

async fn verify_one<P: Provider>(provider: &P, mut stats: ReportStats) -> Result<()> {
    let content = store::get_report_content(provider, &stats.digest).await?;

    let computed = credential::content_digest(&content);
    if computed != stats.digest {
        let message = format!("content digest {computed} does not match claimed {}", stats.digest);
        return conclude(provider, &mut stats, ReportStatus::Failed, message).await;
    }

    let Some(signature) = store::get_report_signature(provider, &stats.digest).await? else {
        return conclude(
            provider,
            &mut stats,
            ReportStatus::Failed,
            "no submitter signature on report".to_string(),
        )
        .await;
    };

    let verified = provider
        .verify_signature(&stats.submitter, &content, &signature)
        .await
        .map_err(|e| Error::ServerError(format!("cannot verify report signature: {e}")))?;

    if verified {
        let message = format!("report signed by submitter ({})", stats.submitter);
        conclude(provider, &mut stats, ReportStatus::Verified, message).await
    } else {
        let message = format!("signature invalid for submitter ({})", stats.submitter);
        conclude(provider, &mut stats, ReportStatus::Failed, message).await
    }
}

async fn conclude<P: Provider>(
    provider: &P, stats: &mut ReportStats, status: ReportStatus, message: String,
) -> Result<()> {
    tracing::debug!("report {} {:?}: {message}", stats.digest, status);
    stats.status = status;
    stats.message = message;
    store::put_report_stats(provider, stats).await
}
