//! # Verification Worker
//!
//! Consumes queued presentations, consults the trust oracle, and commits
//! authorization outcomes. A fixed pool of workers processes distinct
//! credentials in parallel; a given SAID is processed single-flight, and all
//! commits for one AID are serialized so a stale result can never clobber a
//! newer one. The worker is the sole writer of `ProcessingState` past
//! `Queued` and of `Validity`.
//!
//! A periodic sweep re-consults the oracle for every currently-valid
//! record (the only path by which a previously-valid authorization changes
//! without a new presentation) and re-enqueues work left `Queued` by retry
//! exhaustion or a crash.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::provider::{ChainStatus, Provider};
use crate::state::{AuthorizationRecord, ProcessingState, Validity};
use crate::{credential, store};

/// Handle to the background verification machinery.
pub(crate) struct Workers {
    tx: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

impl Workers {
    /// Recover interrupted work and start the dispatcher and sweep tasks.
    pub(crate) async fn spawn<P>(provider: P, config: Arc<VerifierConfig>) -> Result<Self>
    where
        P: Provider + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let (shutdown, _) = watch::channel(false);

        let locks = AidLocks::default();
        let inflight = Arc::new(Mutex::new(HashSet::new()));

        // crash recovery: in-flight work is re-processed, tolerating
        // at-least-once oracle consultation
        for mut record in store::pending_presentations(&provider).await? {
            if record.state == ProcessingState::InProgress {
                record.state = ProcessingState::Queued;
                store::put_presentation(&provider, &record).await?;
            }
            let _ = tx.send(record.said);
        }

        dispatch(
            provider.clone(),
            Arc::clone(&config),
            locks.clone(),
            Arc::clone(&inflight),
            rx,
            shutdown.subscribe(),
        );
        sweep_loop(provider, config, locks, tx.clone(), shutdown.subscribe());

        Ok(Self { tx, shutdown })
    }

    /// Queue a presentation for verification.
    pub(crate) fn enqueue(&self, said: &str) {
        let _ = self.tx.send(said.to_string());
    }

    /// Signal all background tasks to stop.
    pub(crate) fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Serializes authorization commits per AID.
#[derive(Clone, Default)]
struct AidLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl AidLocks {
    async fn lock(&self, aid: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .inner
            .lock()
            .expect("lock map is never poisoned")
            .entry(aid.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// Receive queued SAIDs and hand them to the worker pool, single-flight per
/// SAID.
fn dispatch<P>(
    provider: P, config: Arc<VerifierConfig>, locks: AidLocks,
    inflight: Arc<Mutex<HashSet<String>>>, mut rx: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) where
    P: Provider + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(config.workers));

    tokio::spawn(async move {
        loop {
            let said = tokio::select! {
                _ = shutdown.changed() => break,
                said = rx.recv() => {
                    let Some(said) = said else { break };
                    said
                }
            };

            if !inflight.lock().expect("lock is never poisoned").insert(said.clone()) {
                continue;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let provider = provider.clone();
            let config = Arc::clone(&config);
            let locks = locks.clone();
            let inflight = Arc::clone(&inflight);

            tokio::spawn(async move {
                // a fault on one record is isolated: log and move on
                if let Err(e) = process(&provider, &config, &locks, &said).await {
                    tracing::warn!("error processing presentation {said}: {e}");
                }
                inflight.lock().expect("lock is never poisoned").remove(&said);
                drop(permit);
            });
        }
    });
}

/// Verify a single queued presentation through to a terminal outcome or
/// retry exhaustion.
async fn process<P: Provider>(
    provider: &P, config: &VerifierConfig, locks: &AidLocks, said: &str,
) -> Result<()> {
    let Some(mut record) = store::get_presentation(provider, said).await? else {
        return Ok(());
    };
    if record.state == ProcessingState::Done {
        return Ok(());
    }

    record.state = ProcessingState::InProgress;
    store::put_presentation(provider, &record).await?;

    let mut attempt = 0;
    let outcome = loop {
        let status = match tokio::time::timeout(
            config.oracle_timeout(),
            provider.resolve(&record.payload),
        )
        .await
        {
            Err(_) => {
                tracing::warn!("oracle consultation for {said} timed out");
                ChainStatus::Unresolvable
            }
            Ok(Err(e)) => {
                tracing::warn!("oracle consultation for {said} failed: {e}");
                ChainStatus::Unresolvable
            }
            Ok(Ok(status)) => status,
        };

        if status != ChainStatus::Unresolvable {
            break status;
        }

        attempt += 1;
        if attempt >= config.retry_attempts {
            // transient infrastructure trouble must not penalize the
            // holder: return the work to the queue for a later pass
            record.state = ProcessingState::Queued;
            store::put_presentation(provider, &record).await?;
            tracing::debug!("presentation {said} unresolved after {attempt} attempts, requeued");
            return Ok(());
        }
        tokio::time::sleep(config.backoff(attempt - 1)).await;
    };

    let outcome = if outcome == ChainStatus::Verified {
        policy_outcome(config, &record.payload)
    } else {
        outcome
    };

    {
        let _guard = locks.lock(&record.holder).await;
        let existing = store::get_authorization(provider, &record.holder).await?;
        if let Some(next) =
            apply_outcome(existing.as_ref(), &record.holder, said, outcome, Utc::now())
        {
            store::put_authorization(provider, &next).await?;
            tracing::info!("{} now {:?} via {said}", record.holder, next.validity);
        }
    }

    record.state = ProcessingState::Done;
    store::put_presentation(provider, &record).await
}

/// Apply the acceptance policy to a chain-verified credential: schema, LEI
/// allowlist, and engagement context role must all match.
fn policy_outcome(config: &VerifierConfig, payload: &[u8]) -> ChainStatus {
    let credential = match credential::parse(payload) {
        Ok(credential) => credential,
        Err(e) => {
            tracing::warn!("stored presentation no longer parses: {e}");
            return ChainStatus::Invalid;
        }
    };

    if credential.schema != config.ecr_schema {
        tracing::debug!("invalid credential presentation, schema {}", credential.schema);
        return ChainStatus::Invalid;
    }
    if !config.lei_allowed(&credential.attributes.lei) {
        tracing::debug!("LEI {} not allowed", credential.attributes.lei);
        return ChainStatus::Invalid;
    }
    if credential.attributes.role != config.submitter_role {
        tracing::debug!("{} is not a valid submitter role", credential.attributes.role);
        return ChainStatus::Invalid;
    }

    ChainStatus::Verified
}

/// The authorization transition table. Pure: returns the record to write,
/// or `None` when the outcome must not alter existing state.
fn apply_outcome(
    existing: Option<&AuthorizationRecord>, aid: &str, said: &str, outcome: ChainStatus,
    now: DateTime<Utc>,
) -> Option<AuthorizationRecord> {
    match outcome {
        ChainStatus::Verified => {
            // revocation is terminal per credential: the same SAID can
            // never re-validate, but a different credential may
            if let Some(existing) = existing {
                if existing.validity == Validity::Revoked
                    && existing.said.as_deref() == Some(said)
                {
                    return None;
                }
            }
            Some(AuthorizationRecord {
                aid: aid.to_string(),
                said: Some(said.to_string()),
                validity: Validity::Valid,
                last_checked_at: Some(now),
            })
        }
        ChainStatus::Revoked => {
            // recorded so queries can distinguish was-valid-now-revoked
            // from never-valid, but a credential that does not back this
            // AID cannot deauthorize it
            let applies = existing
                .is_none_or(|e| e.said.is_none() || e.said.as_deref() == Some(said));
            applies.then(|| AuthorizationRecord {
                aid: aid.to_string(),
                said: Some(said.to_string()),
                validity: Validity::Revoked,
                last_checked_at: Some(now),
            })
        }
        ChainStatus::Invalid => {
            // an invalid presentation never downgrades an AID that is
            // legitimately authorized (or already revoked) via another
            // credential
            let applies = existing
                .is_none_or(|e| matches!(e.validity, Validity::Unknown | Validity::Invalid));
            applies.then(|| AuthorizationRecord {
                aid: aid.to_string(),
                said: None,
                validity: Validity::Invalid,
                last_checked_at: Some(now),
            })
        }
        ChainStatus::Unresolvable => None,
    }
}

/// Periodic background pass: re-check revocation for valid records and
/// re-enqueue stale queued work. Interruptible; never blocks intake.
fn sweep_loop<P>(
    provider: P, config: Arc<VerifierConfig>, locks: AidLocks,
    tx: mpsc::UnboundedSender<String>, mut shutdown: watch::Receiver<bool>,
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
                    if let Err(e) = sweep(&provider, &config, &locks).await {
                        tracing::warn!("revocation sweep failed: {e}");
                    }
                    if let Err(e) = requeue_stale(&provider, &tx).await {
                        tracing::warn!("stale work rescan failed: {e}");
                    }
                }
            }
        }
    });
}

/// Re-consult the oracle for every currently-valid authorization.
async fn sweep<P: Provider>(
    provider: &P, config: &VerifierConfig, locks: &AidLocks,
) -> Result<()> {
    for record in store::all_authorizations(provider).await? {
        if record.validity != Validity::Valid {
            continue;
        }
        let Some(said) = record.said.clone() else {
            continue;
        };

        let status =
            match tokio::time::timeout(config.oracle_timeout(), provider.resolve_now(&said))
                .await
            {
                Err(_) => ChainStatus::Unresolvable,
                Ok(Err(e)) => {
                    tracing::warn!("revocation check for {said} failed: {e}");
                    ChainStatus::Unresolvable
                }
                Ok(Ok(status)) => status,
            };

        let _guard = locks.lock(&record.aid).await;
        let Some(mut current) = store::get_authorization(provider, &record.aid).await? else {
            continue;
        };
        // act only if the record is still backed by the credential checked
        if current.validity != Validity::Valid || current.said.as_deref() != Some(said.as_str())
        {
            continue;
        }

        match status {
            ChainStatus::Revoked => {
                current.validity = Validity::Revoked;
                current.last_checked_at = Some(Utc::now());
                store::put_authorization(provider, &current).await?;
                tracing::info!("credential {said} revoked, deauthorizing {}", record.aid);
            }
            ChainStatus::Verified => {
                current.last_checked_at = Some(Utc::now());
                store::put_authorization(provider, &current).await?;
            }
            // the sweep's only mandate is revocation detection
            ChainStatus::Invalid | ChainStatus::Unresolvable => {}
        }
    }

    Ok(())
}

/// Re-enqueue presentations left `Queued` by retry exhaustion or a crash.
async fn requeue_stale<P: Provider>(
    provider: &P, tx: &mpsc::UnboundedSender<String>,
) -> Result<()> {
    for record in store::pending_presentations(provider).await? {
        if record.state == ProcessingState::Queued {
            let _ = tx.send(record.said);
        }
    }
    Ok(())
}
