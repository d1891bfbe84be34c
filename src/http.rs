//! # HTTP Adapter
//!
//! A thin axum surface over the service handlers. Routing and status
//! mapping only; no verification logic lives here. Embedders mount the
//! returned router on the HTTP server of their choice:
//!
//! ```rust,ignore
//! let verifier = Arc::new(Verifier::new(provider, config).await?);
//! let listener = TcpListener::bind("0.0.0.0:7676").await?;
//! axum::serve(listener, http::router(verifier)).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::authorize::Authorization;
use crate::error::Error;
use crate::provider::Provider;
use crate::{Verifier, report};

/// Content type of a CESR-encoded credential presentation.
const CESR_CONTENT_TYPE: &str = "application/json+cesr";

/// Largest accepted report upload.
const MAX_UPLOAD: usize = 32 * 1024 * 1024;

/// Build the service router.
pub fn router<P>(verifier: Arc<Verifier<P>>) -> Router
where
    P: Provider + Send + Sync + 'static,
{
    Router::new()
        .route("/presentations/:said", put(present::<P>))
        .route("/authorizations/:aid", get(authorization::<P>))
        .route("/request/verify/:aid", post(verify_request::<P>))
        .route("/reports/:aid/:dig", post(upload_report::<P>).get(report_status::<P>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD))
        .layer(CorsLayer::permissive())
        .with_state(verifier)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MalformedPresentation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Configuration(_) | Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, [(header::CONTENT_TYPE, "application/json")], self.to_string()).into_response()
    }
}

/// `PUT /presentations/{said}`: present a credential for verification.
/// Responds 202 regardless of the eventual verification outcome.
async fn present<P>(
    State(verifier): State<Arc<Verifier<P>>>, Path(said): Path<String>, headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Error>
where
    P: Provider + Send + Sync + 'static,
{
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if content_type != Some(CESR_CONTENT_TYPE) {
        return Err(Error::MalformedPresentation(format!(
            "invalid content type={} for VC presentation",
            content_type.unwrap_or("none")
        )));
    }

    verifier.present(&said, &body).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /authorizations/{aid}`: poll the authorization decision.
async fn authorization<P>(
    State(verifier): State<Arc<Verifier<P>>>, Path(aid): Path<String>,
) -> Result<Json<serde_json::Value>, Error>
where
    P: Provider + Send + Sync + 'static,
{
    match verifier.authorization(&aid).await? {
        Authorization::NotFound => Err(Error::NotFound(format!("unknown AID: {aid}"))),
        Authorization::Unauthorized => Err(Error::Unauthorized(format!(
            "identifier {aid} has no valid credential for access"
        ))),
        Authorization::Revoked => Err(Error::Unauthorized(format!(
            "credential for identifier {aid} has been revoked"
        ))),
        Authorization::Authorized { said } => Ok(Json(json!({ "aid": aid, "said": said }))),
    }
}

/// `POST /request/verify/{aid}?data=..&sig=..`: verify a request signature
/// for an authorized AID.
async fn verify_request<P>(
    State(verifier): State<Arc<Verifier<P>>>, Path(aid): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, Error>
where
    P: Provider + Send + Sync + 'static,
{
    let data = params
        .get("data")
        .ok_or_else(|| Error::MalformedPresentation("missing 'data' parameter".into()))?;
    let sig = params
        .get("sig")
        .ok_or_else(|| Error::MalformedPresentation("missing 'sig' parameter".into()))?;

    verifier.verify_request(&aid, data.as_bytes(), sig).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /reports/{aid}/{dig}`: multipart report upload from an authorized
/// AID. Parts: `upload` (the report file) and `signature` (the submitter's
/// detached signature over the content).
async fn upload_report<P>(
    State(verifier): State<Arc<Verifier<P>>>, Path((aid, dig)): Path<(String, String)>,
    mut form: Multipart,
) -> Result<StatusCode, Error>
where
    P: Provider + Send + Sync + 'static,
{
    let mut upload: Option<(String, String, Bytes)> = None;
    let mut signature = String::new();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| Error::MalformedPresentation(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("upload") => {
                let filename = field.file_name().unwrap_or("report").to_string();
                let content_type =
                    field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    Error::MalformedPresentation(format!("cannot read upload: {e}"))
                })?;
                upload = Some((filename, content_type, bytes));
            }
            Some("signature") => {
                signature = field.text().await.map_err(|e| {
                    Error::MalformedPresentation(format!("cannot read signature: {e}"))
                })?;
            }
            _ => {}
        }
    }

    let Some((filename, content_type, content)) = upload else {
        return Err(Error::MalformedPresentation(
            "content type must be multipart/form-data with an upload file".into(),
        ));
    };

    verifier.upload_report(&aid, &dig, &filename, &content_type, &content, &signature).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /reports/{aid}/{dig}`: poll report verification status.
async fn report_status<P>(
    State(verifier): State<Arc<Verifier<P>>>, Path((aid, dig)): Path<(String, String)>,
) -> Result<Json<report::ReportStats>, Error>
where
    P: Provider + Send + Sync + 'static,
{
    let stats = verifier.report_status(&aid, &dig).await?;
    Ok(Json(stats))
}
