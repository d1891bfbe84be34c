//! # Credential Container
//!
//! Minimal handling of the presented credential container: version-string
//! framing of the leading JSON body, extraction of the fields the
//! authorization engine needs, and recomputation of the self-addressing
//! identifier (SAID) so intake can reject payloads whose claimed content
//! address does not match their content.
//!
//! Full CESR primitive parsing is the trust oracle's concern; attachments
//! trailing the JSON body are carried opaquely.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a qb64-encoded 32-byte digest.
const SAID_LEN: usize = 44;

/// Length of the serialization version string, e.g. `ACDC10JSON0000fb_`.
const VERSION_LEN: usize = 17;

/// An Engagement Context Role credential as presented, reduced to the fields
/// the engine acts on. Unknown fields are preserved by the raw payload, not
/// here.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EcrCredential {
    /// Self-addressing identifier of the credential.
    #[serde(rename = "d")]
    pub said: String,

    /// AID of the credential issuer.
    #[serde(rename = "i")]
    pub issuer: String,

    /// Credential registry identifier, when anchored.
    #[serde(rename = "ri", skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// SAID of the credential's JSON schema.
    #[serde(rename = "s")]
    pub schema: String,

    /// Credential attributes block.
    #[serde(rename = "a")]
    pub attributes: EcrAttributes,
}

/// Attributes block of an ECR credential.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EcrAttributes {
    /// SAID of the attributes block.
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub said: Option<String>,

    /// AID of the credential holder, the subject being authorized.
    #[serde(rename = "i")]
    pub holder: String,

    /// Legal Entity Identifier of the holder's organization.
    #[serde(rename = "LEI")]
    pub lei: String,

    /// Engagement context role granted to the holder.
    #[serde(rename = "engagementContextRole")]
    pub role: String,
}

/// Parse a presented container: frame the JSON body off the raw submission,
/// deserialize the credential, and check its self-addressing identifier.
///
/// # Errors
///
/// Returns `Error::MalformedPresentation` when the payload cannot be framed
/// or parsed, or when the embedded SAID does not match the recomputed
/// content address.
pub fn parse(payload: &[u8]) -> Result<EcrCredential> {
    let body = frame(payload)?;

    let credential: EcrCredential = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedPresentation(format!("cannot parse credential: {e}")))?;

    let computed = said_of(body)?;
    if computed != credential.said {
        return Err(Error::MalformedPresentation(format!(
            "credential SAID {} does not match content address {computed}",
            credential.said
        )));
    }

    Ok(credential)
}

/// Slice the leading JSON body off a raw submission using the size encoded
/// in its serialization version string.
pub(crate) fn frame(payload: &[u8]) -> Result<&[u8]> {
    const PREFIX: &[u8] = b"{\"v\":\"";

    if payload.len() < PREFIX.len() + VERSION_LEN || !payload.starts_with(PREFIX) {
        return Err(Error::MalformedPresentation(
            "payload does not begin with a versioned JSON body".into(),
        ));
    }

    let version = &payload[PREFIX.len()..PREFIX.len() + VERSION_LEN];
    if version[6..10] != *b"JSON" || version[16] != b'_' {
        return Err(Error::MalformedPresentation(
            "unsupported serialization kind in version string".into(),
        ));
    }

    let size_hex = std::str::from_utf8(&version[10..16])
        .map_err(|_| Error::MalformedPresentation("invalid version string".into()))?;
    let size = usize::from_str_radix(size_hex, 16)
        .map_err(|_| Error::MalformedPresentation("invalid size in version string".into()))?;

    if size < PREFIX.len() + VERSION_LEN || payload.len() < size {
        return Err(Error::MalformedPresentation(format!(
            "payload truncated: body size {size}, payload {}",
            payload.len()
        )));
    }

    Ok(&payload[..size])
}

/// Recompute the self-addressing identifier of a framed JSON body: the
/// Blake3-256 digest of the body with the SAID field blanked to a
/// same-length placeholder.
///
/// The top-level `d` field precedes any nested digest in the credential's
/// serialization order, so the first occurrence is the one to blank.
pub(crate) fn said_of(body: &[u8]) -> Result<String> {
    const MARKER: &[u8] = b"\"d\":\"";

    let at = body
        .windows(MARKER.len())
        .position(|w| w == MARKER)
        .ok_or_else(|| Error::MalformedPresentation("credential has no SAID field".into()))?;

    let start = at + MARKER.len();
    let end = start + SAID_LEN;
    if body.len() <= end || body[end] != b'"' {
        return Err(Error::MalformedPresentation("credential SAID field is malformed".into()));
    }

    let mut blanked = body.to_vec();
    blanked[start..end].fill(b'#');

    Ok(qb64_blake3(blake3::hash(&blanked).as_bytes()))
}

/// The qb64 Blake3-256 content digest of arbitrary data, as used to address
/// report uploads.
#[must_use]
pub fn content_digest(data: &[u8]) -> String {
    qb64_blake3(blake3::hash(data).as_bytes())
}

/// Encode a 32-byte Blake3-256 digest as a qb64 self-addressing identifier:
/// one pad byte prepended, base64url encoded, the pad character replaced by
/// the `E` derivation code.
pub(crate) fn qb64_blake3(digest: &[u8; 32]) -> String {
    let mut padded = [0u8; 33];
    padded[1..].copy_from_slice(digest);

    let b64 = Base64UrlUnpadded::encode_string(&padded);
    format!("E{}", &b64[1..])
}
