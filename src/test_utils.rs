//! # Test Utilities
//!
//! Hard-coded provider trait implementations that can be used for testing
//! and examples: an in-memory datastore and a scriptable trust oracle.

#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::anyhow;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::VerifierConfig;
use crate::provider::{ChainStatus, Datastore, Result, TrustOracle};
use crate::state::Validity;
use crate::{Verifier, credential, store};

// initialise tracing once for all tests
static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// # Panics
///
/// Panics if the tracing subscriber cannot be set.
pub fn init_tracer() {
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::ERROR).finish();
        tracing::subscriber::set_global_default(subscriber).expect("subscriber set");
    });
}

/// In-memory provider: a keyed store plus a scriptable oracle.
#[derive(Clone, Debug, Default)]
pub struct Provider {
    store: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    outcomes: Arc<Mutex<HashMap<String, VecDeque<ChainStatus>>>>,
    resolved: Arc<Mutex<HashMap<String, u32>>>,
}

impl Provider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a single, sticky oracle outcome for a SAID, replacing any
    /// previous script.
    pub fn set_outcome(&self, said: &str, status: ChainStatus) {
        self.push_outcomes(said, vec![status]);
    }

    /// Script a sequence of oracle outcomes for a SAID. The last entry is
    /// sticky: once reached it is returned for every further consultation.
    pub fn push_outcomes(&self, said: &str, outcomes: Vec<ChainStatus>) {
        self.outcomes
            .lock()
            .expect("lock")
            .insert(said.to_string(), outcomes.into_iter().collect());
    }

    /// Number of full chain resolutions performed for a SAID.
    #[must_use]
    pub fn resolve_calls(&self, said: &str) -> u32 {
        self.resolved.lock().expect("lock").get(said).copied().unwrap_or(0)
    }

    fn next_outcome(&self, said: &str) -> ChainStatus {
        let mut outcomes = self.outcomes.lock().expect("lock");
        let Some(script) = outcomes.get_mut(said) else {
            return ChainStatus::Invalid;
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or(ChainStatus::Invalid)
        } else {
            script.front().copied().unwrap_or(ChainStatus::Invalid)
        }
    }
}

impl Datastore for Provider {
    async fn put(&self, key: &str, data: impl Serialize + Send) -> Result<()> {
        let bytes = serde_json::to_vec(&data)?;
        self.store.lock().expect("lock").insert(key.to_string(), bytes);
        Ok(())
    }

    async fn insert(&self, key: &str, data: impl Serialize + Send) -> Result<bool> {
        let bytes = serde_json::to_vec(&data)?;
        let mut store = self.store.lock().expect("lock");
        if store.contains_key(key) {
            return Ok(false);
        }
        store.insert(key.to_string(), bytes);
        Ok(true)
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.store.lock().expect("lock").get(key).cloned() else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.lock().expect("lock").remove(key);
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let values: Vec<Vec<u8>> = self
            .store
            .lock()
            .expect("lock")
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect();

        values.iter().map(|v| Ok(serde_json::from_slice(v)?)).collect()
    }
}

impl TrustOracle for Provider {
    async fn resolve(&self, payload: &[u8]) -> Result<ChainStatus> {
        let credential =
            credential::parse(payload).map_err(|e| anyhow!("unparseable payload: {e}"))?;
        *self.resolved.lock().expect("lock").entry(credential.said.clone()).or_insert(0) += 1;
        Ok(self.next_outcome(&credential.said))
    }

    async fn resolve_now(&self, said: &str) -> Result<ChainStatus> {
        Ok(self.next_outcome(said))
    }

    async fn verify_signature(&self, aid: &str, data: &[u8], sig: &str) -> Result<bool> {
        Ok(sig == sign(aid, data))
    }
}

impl crate::provider::Provider for Provider {}

/// The signature [`Provider::verify_signature`] accepts for `aid` over
/// `data`.
#[must_use]
pub fn sign(aid: &str, data: &[u8]) -> String {
    let mut signed = aid.as_bytes().to_vec();
    signed.extend_from_slice(data);
    format!("0B{}", credential::qb64_blake3(blake3::hash(&signed).as_bytes()))
}

/// Configuration with tight scheduling for tests: small pool, fast retries,
/// fast sweep, [`sample::LEI`] allowed.
#[must_use]
pub fn fast_config() -> VerifierConfig {
    VerifierConfig {
        allowed_leis: vec![sample::LEI.to_string()],
        workers: 2,
        oracle_timeout_ms: 250,
        retry_attempts: 3,
        retry_base_ms: 10,
        retry_max_ms: 40,
        sweep_interval_ms: 50,
        ..VerifierConfig::default()
    }
}

/// A running service over the given provider with [`fast_config`].
pub async fn verifier(provider: Provider) -> Verifier<Provider> {
    Verifier::new(provider, fast_config()).await.expect("verifier starts")
}

/// Poll the authorization table until `aid` reaches `validity`.
///
/// # Panics
///
/// Panics if the state is not reached within two seconds.
pub async fn poll_until(provider: &Provider, aid: &str, validity: Validity) {
    for _ in 0..200 {
        if let Some(record) = store::get_authorization(provider, aid).await.expect("store read")
        {
            if record.validity == validity {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{aid} did not reach {validity:?}");
}

pub mod sample {
    //! Sample ECR credentials with correct self-addressing identifiers.

    use crate::config::{ECR_SCHEMA_SAID, SUBMITTER_ROLE};
    use crate::credential;

    /// Holder AID used by the sample credentials.
    pub const HOLDER: &str = "EIaGMMWJFPmtXznY1IIiKDIrg-vIyge6mBl2QV8dDjI3";

    /// LEI used by the sample credentials.
    pub const LEI: &str = "254900OPPU84GM83MG36";

    const ISSUER: &str = "EHOuGiHMxJShXHgSb6k_9pqxmRb8H-LT0R2hQouHp8pW";
    const REGISTRY: &str = "EO0_SyqPS1-EVYSITakYpUHaUZZpZGsjaXFOaO_kCfS4";
    const ATTRS_SAID: &str = "ELjvc_mZsxHGuPHPypnybbwO3zX2KBfSPxCkwCSOxGeT";

    /// A well-formed ECR credential for `aid` under `lei`, with the default
    /// role and schema. Returns `(said, payload)`.
    #[must_use]
    pub fn credential(aid: &str, lei: &str) -> (String, Vec<u8>) {
        credential_with(aid, lei, SUBMITTER_ROLE, ECR_SCHEMA_SAID)
    }

    /// A well-formed credential with explicit role and schema.
    #[must_use]
    pub fn credential_with(aid: &str, lei: &str, role: &str, schema: &str) -> (String, Vec<u8>) {
        let render = |d: &str, size: &str| {
            format!(
                r#"{{"v":"ACDC10JSON{size}_","d":"{d}","i":"{ISSUER}","ri":"{REGISTRY}","s":"{schema}","a":{{"d":"{ATTRS_SAID}","i":"{aid}","LEI":"{lei}","engagementContextRole":"{role}"}}}}"#
            )
        };

        let placeholder = "#".repeat(44);
        let size = format!("{:06x}", render(&placeholder, "000000").len());
        let blanked = render(&placeholder, &size);
        let said = credential::qb64_blake3(blake3::hash(blanked.as_bytes()).as_bytes());

        (said.clone(), render(&said, &size).into_bytes())
    }
}
