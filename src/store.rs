//! # Tables
//!
//! Typed access to the two service tables, presentations and
//! authorizations, plus the report sub-tables, all layered over the
//! [`Datastore`] capability. Key namespaces keep the tables disjoint within
//! a single keyed store, mirroring sub-database layouts of embedded
//! key-value engines.

use crate::error::{Error, Result};
use crate::provider::Datastore;
use crate::report::ReportStats;
use crate::state::{AuthorizationRecord, PresentationRecord, ProcessingState};

const PRESENTATION: &str = "presentation:";
const AUTHORIZATION: &str = "authorization:";
const REPORT: &str = "report:";
const REPORT_SIG: &str = "report-sig:";
const REPORT_CHUNK: &str = "report-chunk:";

fn internal(e: anyhow::Error) -> Error {
    Error::ServerError(format!("datastore failure: {e}"))
}

// --- presentations ---------------------------------------------------------

/// Create a presentation record unless one already exists for its SAID.
/// Returns `false` when the SAID was already submitted.
pub(crate) async fn insert_presentation(
    ds: &impl Datastore, record: &PresentationRecord,
) -> Result<bool> {
    ds.insert(&format!("{PRESENTATION}{}", record.said), record).await.map_err(internal)
}

pub(crate) async fn get_presentation(
    ds: &impl Datastore, said: &str,
) -> Result<Option<PresentationRecord>> {
    ds.get(&format!("{PRESENTATION}{said}")).await.map_err(internal)
}

/// Replace a presentation record. Only the verification worker transitions
/// `state` past `Queued`.
pub(crate) async fn put_presentation(
    ds: &impl Datastore, record: &PresentationRecord,
) -> Result<()> {
    ds.put(&format!("{PRESENTATION}{}", record.said), record).await.map_err(internal)
}

/// All presentations that have not reached a terminal outcome.
pub(crate) async fn pending_presentations(
    ds: &impl Datastore,
) -> Result<Vec<PresentationRecord>> {
    let all: Vec<PresentationRecord> = ds.list(PRESENTATION).await.map_err(internal)?;
    Ok(all.into_iter().filter(|p| p.state != ProcessingState::Done).collect())
}

// --- authorizations --------------------------------------------------------

/// Create an authorization record unless the AID already has one. Intake
/// uses this so an existing record's validity is never overwritten.
pub(crate) async fn insert_authorization(
    ds: &impl Datastore, record: &AuthorizationRecord,
) -> Result<bool> {
    ds.insert(&format!("{AUTHORIZATION}{}", record.aid), record).await.map_err(internal)
}

pub(crate) async fn get_authorization(
    ds: &impl Datastore, aid: &str,
) -> Result<Option<AuthorizationRecord>> {
    ds.get(&format!("{AUTHORIZATION}{aid}")).await.map_err(internal)
}

/// Replace an authorization record. Callers serialize per AID.
pub(crate) async fn put_authorization(
    ds: &impl Datastore, record: &AuthorizationRecord,
) -> Result<()> {
    ds.put(&format!("{AUTHORIZATION}{}", record.aid), record).await.map_err(internal)
}

/// All authorization records, for the revocation sweep.
pub(crate) async fn all_authorizations(
    ds: &impl Datastore,
) -> Result<Vec<AuthorizationRecord>> {
    ds.list(AUTHORIZATION).await.map_err(internal)
}

// --- reports ---------------------------------------------------------------

pub(crate) async fn put_report_stats(ds: &impl Datastore, stats: &ReportStats) -> Result<()> {
    ds.put(&format!("{REPORT}{}", stats.digest), stats).await.map_err(internal)
}

pub(crate) async fn get_report_stats(
    ds: &impl Datastore, dig: &str,
) -> Result<Option<ReportStats>> {
    ds.get(&format!("{REPORT}{dig}")).await.map_err(internal)
}

pub(crate) async fn all_report_stats(ds: &impl Datastore) -> Result<Vec<ReportStats>> {
    ds.list(REPORT).await.map_err(internal)
}

pub(crate) async fn put_report_signature(
    ds: &impl Datastore, dig: &str, sig: &str,
) -> Result<()> {
    ds.put(&format!("{REPORT_SIG}{dig}"), sig).await.map_err(internal)
}

pub(crate) async fn get_report_signature(
    ds: &impl Datastore, dig: &str,
) -> Result<Option<String>> {
    ds.get(&format!("{REPORT_SIG}{dig}")).await.map_err(internal)
}

/// Store report content in fixed-size chunks, replacing any previous upload
/// under the same digest.
pub(crate) async fn put_report_chunks(
    ds: &impl Datastore, dig: &str, content: &[u8], chunk_size: usize,
) -> Result<()> {
    for (idx, chunk) in content.chunks(chunk_size).enumerate() {
        ds.put(&chunk_key(dig, idx), chunk.to_vec()).await.map_err(internal)?;
    }
    // tombstone so a shorter re-upload is not extended by stale chunks
    let tail = content.len().div_ceil(chunk_size);
    ds.delete(&chunk_key(dig, tail)).await.map_err(internal)?;
    Ok(())
}

/// Reassemble report content from its chunks.
pub(crate) async fn get_report_content(ds: &impl Datastore, dig: &str) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    for idx in 0.. {
        let Some(chunk) = ds.get::<Vec<u8>>(&chunk_key(dig, idx)).await.map_err(internal)?
        else {
            break;
        };
        content.extend_from_slice(&chunk);
    }
    Ok(content)
}

fn chunk_key(dig: &str, idx: usize) -> String {
    format!("{REPORT_CHUNK}{dig}:{idx:08}")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::test_utils;

    fn presentation(said: &str) -> PresentationRecord {
        PresentationRecord {
            said: said.to_string(),
            payload: b"{}".to_vec(),
            holder: "EIaGMMWJFPmtXznY1IIiKDIrg-vIyge6mBl2QV8dDjI3".into(),
            submitted_at: Utc::now(),
            state: ProcessingState::Queued,
        }
    }

    #[tokio::test]
    async fn presentation_insert_is_create_only() {
        let provider = test_utils::Provider::new();
        let record = presentation("EBfdlu8R27Fbx-ehrqwImnK-8Cm79sqbAQ4MmvEAYqao");

        assert!(insert_presentation(&provider, &record).await.expect("first insert"));
        assert!(!insert_presentation(&provider, &record).await.expect("second insert"));

        let stored = get_presentation(&provider, &record.said)
            .await
            .expect("get succeeds")
            .expect("record exists");
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn pending_excludes_done() {
        let provider = test_utils::Provider::new();

        let queued = presentation("EBfdlu8R27Fbx-ehrqwImnK-8Cm79sqbAQ4MmvEAYqao");
        let mut done = presentation("EIaGMMWJFPmtXznY1IIiKDIrg-vIyge6mBl2QV8dDjI3");
        done.state = ProcessingState::Done;

        insert_presentation(&provider, &queued).await.expect("insert");
        insert_presentation(&provider, &done).await.expect("insert");

        let pending = pending_presentations(&provider).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].said, queued.said);
    }

    #[tokio::test]
    async fn chunked_content_roundtrip() {
        let provider = test_utils::Provider::new();
        let content: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();

        put_report_chunks(&provider, "EDig", &content, 4096).await.expect("store");
        let loaded = get_report_content(&provider, "EDig").await.expect("load");
        assert_eq!(loaded, content);

        // a shorter re-upload fully replaces the previous content
        let shorter = vec![7u8; 100];
        put_report_chunks(&provider, "EDig", &shorter, 4096).await.expect("store");
        let loaded = get_report_content(&provider, "EDig").await.expect("load");
        assert_eq!(loaded, shorter);
    }
}
