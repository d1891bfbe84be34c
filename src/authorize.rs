//! # Authorization Queries
//!
//! Answers "is this AID currently an authorized submitter" against the
//! authorization table, and verifies request signatures for AIDs that are.
//! Queries are read-only and side-effect free so polling stays cheap; the
//! window in which verification has not concluded is reported as
//! unauthorized-but-known, distinct from never-presented.

use tracing::instrument;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::state::Validity;
use crate::{Verifier, store};

/// Authorization status for an AID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authorization {
    /// No presentation has ever referenced this AID.
    NotFound,

    /// A record exists but the AID is not authorized: verification is
    /// pending, or the last concluded presentation was invalid.
    Unauthorized,

    /// The AID was authorized and its credential has since been revoked.
    Revoked,

    /// The AID is backed by a valid, non-revoked credential.
    Authorized {
        /// SAID of the backing credential.
        said: String,
    },
}

impl<P: Provider> Verifier<P> {
    /// Current authorization status for `aid`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServerError` on storage faults. An unknown AID is a
    /// normal `NotFound`, not an error.
    #[instrument(level = "debug", skip(self))]
    pub async fn authorization(&self, aid: &str) -> Result<Authorization> {
        let Some(record) = store::get_authorization(&self.provider, aid).await? else {
            return Ok(Authorization::NotFound);
        };

        let status = match record.validity {
            Validity::Unknown | Validity::Invalid => Authorization::Unauthorized,
            Validity::Revoked => Authorization::Revoked,
            Validity::Valid => Authorization::Authorized {
                said: record.said.unwrap_or_default(),
            },
        };

        Ok(status)
    }

    /// Verify a detached signature over `data` for a currently-authorized
    /// AID.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when the AID has never presented,
    /// `Error::Unauthorized` when it is not currently authorized or the
    /// signature does not verify.
    #[instrument(level = "debug", skip(self, data))]
    pub async fn verify_request(&self, aid: &str, data: &[u8], sig: &str) -> Result<()> {
        match self.authorization(aid).await? {
            Authorization::NotFound => {
                return Err(Error::NotFound(format!("unknown AID: {aid}")));
            }
            Authorization::Unauthorized | Authorization::Revoked => {
                return Err(Error::Unauthorized(format!(
                    "identifier {aid} has no valid credential for access"
                )));
            }
            Authorization::Authorized { .. } => {}
        }

        let verified = self
            .provider
            .verify_signature(aid, data, sig)
            .await
            .map_err(|e| Error::ServerError(format!("cannot verify signature: {e}")))?;

        if !verified {
            return Err(Error::Unauthorized(format!(
                "{aid} provided invalid signature on request data"
            )));
        }

        Ok(())
    }

    /// Guard shared by the report endpoints: the AID must currently be
    /// authorized.
    pub(crate) async fn require_authorized(&self, aid: &str) -> Result<()> {
        match self.authorization(aid).await? {
            Authorization::NotFound => Err(Error::NotFound(format!("unknown AID: {aid}"))),
            Authorization::Unauthorized | Authorization::Revoked => Err(Error::Unauthorized(
                format!("identifier {aid} has no valid credential for access"),
            )),
            Authorization::Authorized { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChainStatus;
    use crate::test_utils::{self, sample};

    #[tokio::test]
    async fn unknown_aid_is_not_found() {
        test_utils::init_tracer();
        let provider = test_utils::Provider::new();
        let verifier = test_utils::verifier(provider.clone()).await;

        let status =
            verifier.authorization("ENeverPresentedAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").await.expect("query");
        assert_eq!(status, Authorization::NotFound);

        verifier.shutdown();
    }

    #[tokio::test]
    async fn pending_aid_is_unauthorized_not_missing() {
        test_utils::init_tracer();
        let provider = test_utils::Provider::new();
        let verifier = test_utils::verifier(provider.clone()).await;

        let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
        provider.set_outcome(&said, ChainStatus::Unresolvable);
        verifier.present(&said, &payload).await.expect("accepted");

        let status = verifier.authorization(sample::HOLDER).await.expect("query");
        assert_eq!(status, Authorization::Unauthorized);

        verifier.shutdown();
    }

    #[tokio::test]
    async fn request_signature_requires_authorization() {
        test_utils::init_tracer();
        let provider = test_utils::Provider::new();
        let verifier = test_utils::verifier(provider.clone()).await;

        let err = verifier
            .verify_request("ENeverPresentedAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", b"data", "sig")
            .await
            .expect_err("unknown AID");
        assert!(matches!(err, Error::NotFound(_)));

        let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
        provider.set_outcome(&said, ChainStatus::Verified);
        verifier.present(&said, &payload).await.expect("accepted");
        test_utils::poll_until(&provider, sample::HOLDER, crate::state::Validity::Valid).await;

        let data = b"request body";
        let good = test_utils::sign(sample::HOLDER, data);
        verifier.verify_request(sample::HOLDER, data, &good).await.expect("signature verifies");

        let err = verifier
            .verify_request(sample::HOLDER, data, "not-a-signature")
            .await
            .expect_err("bad signature");
        assert!(matches!(err, Error::Unauthorized(_)));

        verifier.shutdown();
    }
}
