//! # Records
//!
//! Persisted state for the two service tables: presentations awaiting or
//! holding the result of verification, and the per-AID authorization record
//! the query resolver answers from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a submitted presentation.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// Accepted at intake, waiting for a verification worker.
    #[default]
    Queued,

    /// Claimed by a verification worker. Reset to `Queued` on restart.
    InProgress,

    /// Verification reached a terminal outcome.
    Done,
}

/// A credential presentation accepted at intake. At most one record exists
/// per SAID; repeated submissions are a no-op against existing state.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PresentationRecord {
    /// Content-addressed identifier of the presented credential.
    pub said: String,

    /// The raw CESR-encoded submission, attachments included.
    pub payload: Vec<u8>,

    /// Holder AID named by the credential, cached at intake.
    pub holder: String,

    /// When the presentation was accepted.
    pub submitted_at: DateTime<Utc>,

    /// Verification pipeline state.
    pub state: ProcessingState,
}

/// Validity of an identifier's authorization.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    /// A presentation names this AID but verification has not concluded.
    #[default]
    Unknown,

    /// The oracle confirmed chain validity and non-revocation as of
    /// `last_checked_at`.
    Valid,

    /// The last concluded presentation for this AID failed verification.
    Invalid,

    /// A once-valid credential was found revoked. Terminal for its SAID: a
    /// new presentation with a different credential is required to
    /// re-authorize.
    Revoked,
}

/// Current authorization state for a holder AID. Created the moment a
/// presentation naming the AID is accepted; mutated only by the verification
/// worker; never deleted.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthorizationRecord {
    /// The holder AID.
    pub aid: String,

    /// SAID of the credential backing (or, when revoked, last backing) this
    /// authorization. `None` until a presentation reaches `Valid` or
    /// `Revoked`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub said: Option<String>,

    /// Current validity.
    pub validity: Validity,

    /// Most recent oracle consultation for this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl AuthorizationRecord {
    /// A fresh record for an AID whose verification has not yet concluded.
    #[must_use]
    pub fn unknown(aid: &str) -> Self {
        Self {
            aid: aid.to_string(),
            said: None,
            validity: Validity::Unknown,
            last_checked_at: None,
        }
    }
}
