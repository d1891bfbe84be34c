//! # Presentation Intake
//!
//! Accepts a credential presentation for asynchronous verification. Intake
//! performs only the synchronous structural check (the claimed SAID must be
//! the content address of the payload), records the submission, and enqueues
//! verification work exactly once. It never reports a verification outcome:
//! the response tells the caller nothing beyond "accepted for processing",
//! so intake timing cannot become an oracle side-channel and never blocks on
//! chain resolution.

use chrono::Utc;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::state::{AuthorizationRecord, PresentationRecord, ProcessingState};
use crate::{Verifier, credential, store};

impl<P: Provider> Verifier<P> {
    /// Accept a credential presentation for verification.
    ///
    /// Repeated submissions for a SAID already on record are idempotent:
    /// they succeed without creating a new record or re-enqueueing work.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedPresentation` when the payload cannot be
    /// parsed or `said` is not its content address, and `Error::ServerError`
    /// on storage faults.
    #[instrument(level = "debug", skip(self, payload))]
    pub async fn present(&self, said: &str, payload: &[u8]) -> Result<()> {
        let credential = credential::parse(payload)?;
        if credential.said != said {
            return Err(Error::MalformedPresentation(format!(
                "presented SAID {said} does not match credential {}",
                credential.said
            )));
        }

        let record = PresentationRecord {
            said: said.to_string(),
            payload: payload.to_vec(),
            holder: credential.attributes.holder.clone(),
            submitted_at: Utc::now(),
            state: ProcessingState::Queued,
        };

        // The create-if-absent insert decides the winner among concurrent
        // first submissions; only the winner enqueues.
        if store::insert_presentation(&self.provider, &record).await? {
            store::insert_authorization(
                &self.provider,
                &AuthorizationRecord::unknown(&record.holder),
            )
            .await?;

            self.workers.enqueue(said);
            tracing::debug!("presentation {said} accepted for {}", record.holder);
        } else {
            tracing::debug!("presentation {said} already on record");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VerifierConfig;
    use crate::state::Validity;
    use crate::test_utils::{self, sample};

    fn config() -> VerifierConfig {
        VerifierConfig {
            allowed_leis: vec![sample::LEI.into()],
            ..test_utils::fast_config()
        }
    }

    #[tokio::test]
    async fn intake_creates_both_records() {
        test_utils::init_tracer();
        let provider = test_utils::Provider::new();
        let verifier = Verifier::new(provider.clone(), config()).await.expect("verifier starts");

        let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
        verifier.present(&said, &payload).await.expect("accepted");

        let presentation = store::get_presentation(&provider, &said)
            .await
            .expect("store read")
            .expect("presentation recorded");
        assert_eq!(presentation.holder, sample::HOLDER);

        let authorization = store::get_authorization(&provider, sample::HOLDER)
            .await
            .expect("store read")
            .expect("authorization recorded");
        assert_eq!(authorization.validity, Validity::Unknown);

        verifier.shutdown();
    }

    #[tokio::test]
    async fn mismatched_said_rejected_without_state() {
        test_utils::init_tracer();
        let provider = test_utils::Provider::new();
        let verifier = Verifier::new(provider.clone(), config()).await.expect("verifier starts");

        let (_, payload) = sample::credential(sample::HOLDER, sample::LEI);
        let wrong = "EAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

        let err = verifier.present(wrong, &payload).await.expect_err("rejected");
        assert!(matches!(err, Error::MalformedPresentation(_)));

        assert!(store::get_presentation(&provider, wrong).await.expect("read").is_none());
        assert!(
            store::get_authorization(&provider, sample::HOLDER).await.expect("read").is_none()
        );

        verifier.shutdown();
    }

    #[tokio::test]
    async fn repeat_intake_does_not_reset_existing_state() {
        test_utils::init_tracer();
        let provider = test_utils::Provider::new();
        let verifier = Verifier::new(provider.clone(), config()).await.expect("verifier starts");

        let (said, payload) = sample::credential(sample::HOLDER, sample::LEI);
        provider.set_outcome(&said, crate::provider::ChainStatus::Verified);

        verifier.present(&said, &payload).await.expect("accepted");
        test_utils::poll_until(&provider, sample::HOLDER, Validity::Valid).await;

        // a second submission must not disturb the Valid record
        verifier.present(&said, &payload).await.expect("accepted again");
        let authorization = store::get_authorization(&provider, sample::HOLDER)
            .await
            .expect("store read")
            .expect("authorization recorded");
        assert_eq!(authorization.validity, Validity::Valid);
        assert_eq!(provider.resolve_calls(&said), 1);

        verifier.shutdown();
    }
}
