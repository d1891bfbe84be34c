//! # Provider
//!
//! Capability traits the service depends on but does not implement: durable
//! key-value storage and the trust oracle that resolves credential chains,
//! revocation state, and holder signatures against key-state infrastructure.
//!
//! Implementers wire these to their storage engine and their identifier/event
//! -log infrastructure. Hard-coded implementations suitable for testing and
//! examples can be found in [`crate::test_utils`].

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Result type for provider callbacks.
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Provider is implemented by the single object wiring all external
/// capabilities together.
pub trait Provider: Datastore + TrustOracle + Clone {}

/// Outcome of consulting the trust oracle for a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    /// The issuance chain verifies and the credential is not revoked as of
    /// the time of the check.
    Verified,

    /// The issuance chain verifies but the credential has been revoked.
    Revoked,

    /// The issuance chain does not verify. Terminal: never retried.
    Invalid,

    /// The oracle could not reach a determination (timeout, unreachable
    /// witnesses, transient infrastructure fault). Retried with backoff.
    Unresolvable,
}

/// `Datastore` is the durable keyed storage both service tables are built
/// on. Keys are namespaced strings; values serialize through serde.
///
/// Reads must observe the latest committed `put` for a key so that a status
/// committed by the verification worker is immediately visible to queries.
pub trait Datastore: Send + Sync {
    /// Store data under the provided key, replacing any existing value.
    fn put(
        &self, key: &str, data: impl Serialize + Send,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Store data under the provided key only if the key is vacant. Returns
    /// `true` if the value was stored, `false` if the key already existed.
    fn insert(
        &self, key: &str, data: impl Serialize + Send,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Retrieve data stored under the provided key, if any.
    fn get<T: DeserializeOwned>(
        &self, key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send;

    /// Remove data stored under the provided key.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Retrieve all values stored under keys beginning with `prefix`.
    fn list<T: DeserializeOwned>(
        &self, prefix: &str,
    ) -> impl Future<Output = Result<Vec<T>>> + Send;
}

/// `TrustOracle` resolves whether a credential's issuance chain is
/// cryptographically valid and whether it is currently revoked, and verifies
/// signatures against a holder's current key state.
///
/// Calls may block on network or disk-bound chain resolution; the
/// verification worker wraps every call in a timeout.
pub trait TrustOracle: Send + Sync {
    /// Resolve the full chain for a presented credential container. The
    /// payload is the raw CESR-encoded submission, attachments included.
    fn resolve(&self, payload: &[u8]) -> impl Future<Output = Result<ChainStatus>> + Send;

    /// Re-resolve the current chain and revocation state of a previously
    /// presented credential by its SAID. Used by the revocation sweep.
    fn resolve_now(&self, said: &str) -> impl Future<Output = Result<ChainStatus>> + Send;

    /// Verify a detached signature over `data` against the current key state
    /// of `aid`. Returns `false` for a well-formed but invalid signature.
    fn verify_signature(
        &self, aid: &str, data: &[u8], sig: &str,
    ) -> impl Future<Output = Result<bool>> + Send;
}
