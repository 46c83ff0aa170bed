//! The HTTP surface of spec §6.4, wired with `warp` the way the
//! teacher's `cloud-relay` binary hosts its own (smaller) surface
//! alongside a libp2p swarm. Each handler does the minimum glue: pull a
//! `Session` out of the request, call into `phr::PhrSystem`, and map
//! the result onto the status codes spec §6.4/§7 specify.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Buf;
use futures::TryStreamExt;
use phr_core::{AccessOutcome, Error as CoreError};
use serde::{Deserialize, Serialize};
use warp::{Filter, Rejection, Reply};

use crate::directory::SledUserDirectory;
use crate::session::{CookieSessionGate, Session};

const SESSION_COOKIE: &str = "phr_session";

/// Everything a route handler needs, bundled so `warp::Filter`
/// composition stays readable.
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<phr::PhrSystem>,
    pub directory: Arc<SledUserDirectory>,
    pub sessions: Arc<CookieSessionGate>,
}

#[derive(Debug)]
struct ApiError(CoreError);

impl warp::reject::Reject for ApiError {}

#[derive(Debug)]
struct MissingSession;
impl warp::reject::Reject for MissingSession {}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn session_filter(
    state: AppState,
) -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    warp::cookie::optional(SESSION_COOKIE)
        .and(with_state(state))
        .and_then(|cookie: Option<String>, state: AppState| async move {
            cookie
                .as_deref()
                .and_then(|c| state.sessions.verify(c))
                .ok_or_else(|| warp::reject::custom(MissingSession))
        })
}

#[derive(Deserialize)]
struct AccessBody {
    object_name: String,
}

#[derive(Serialize)]
#[serde(tag = "status")]
enum AccessResponse {
    #[serde(rename = "granted")]
    Granted {
        wrapped_key: String,
        iv: String,
        blob_ref: String,
    },
}

async fn handle_access(
    session: Session,
    state: AppState,
    body: AccessBody,
) -> Result<impl Reply, Rejection> {
    let outcome = state
        .system
        .access(
            state.directory.as_ref(),
            phr_core::AccessRequest {
                caller_id: session.user_id,
                object_name: body.object_name,
            },
        )
        .map_err(|e| warp::reject::custom(ApiError(e)))?;

    match outcome {
        AccessOutcome::Granted(grant) => Ok(warp::reply::json(&AccessResponse::Granted {
            wrapped_key: grant.wrapped_key_hex,
            iv: grant.nonce_hex,
            blob_ref: grant.blob_ref,
        })),
        AccessOutcome::Denied(status) => {
            Err(warp::reject::custom(ApiError(denial_to_error(status))))
        }
    }
}

fn denial_to_error(status: phr_core::Status) -> CoreError {
    use phr_core::Status::*;
    match status {
        DeniedPolicy => CoreError::PolicyDenied,
        DeniedRevoked => CoreError::Revoked,
        DeniedOwner => CoreError::NotOwner,
        InvalidRequest => CoreError::NotFound,
        DeniedRole | DeniedAuth => CoreError::BadRequest("denied".into()),
        GrantedRewrap | Success => {
            unreachable!("a granted/success status is never turned into an error")
        }
    }
}

#[derive(Deserialize)]
struct UploadField {
    policy: Option<String>,
    key_blob: Option<String>,
    iv: Option<String>,
}

async fn handle_upload(
    session: Session,
    state: AppState,
    form: warp::multipart::FormData,
) -> Result<impl Reply, Rejection> {
    let mut fields = UploadField {
        policy: None,
        key_blob: None,
        iv: None,
    };
    let mut object_name = None;
    let mut blob = Vec::new();

    let mut parts = form
        .try_collect::<Vec<_>>()
        .await
        .map_err(|_| warp::reject::custom(ApiError(CoreError::BadRequest("bad multipart body".into()))))?;

    for part in parts.drain(..) {
        let name = part.name().to_string();
        if name == "file" {
            object_name = part.filename().map(str::to_string);
        }
        let mut data = Vec::new();
        let mut stream = part.stream();
        while let Ok(Some(mut buf)) = stream.try_next().await {
            data.extend_from_slice(buf.copy_to_bytes(buf.remaining()).as_ref());
        }
        match name.as_str() {
            "policy" => fields.policy = Some(String::from_utf8_lossy(&data).into_owned()),
            "key_blob" => fields.key_blob = Some(String::from_utf8_lossy(&data).into_owned()),
            "iv" => fields.iv = Some(String::from_utf8_lossy(&data).into_owned()),
            "file" => blob = data,
            _ => {}
        }
    }

    let (policy, key_blob, iv, object_name) = match (fields.policy, fields.key_blob, fields.iv, object_name)
    {
        (Some(p), Some(k), Some(i), Some(n)) => (p, k, i, n),
        _ => {
            return Err(warp::reject::custom(ApiError(CoreError::BadRequest(
                "missing required multipart field".into(),
            ))))
        }
    };

    state
        .system
        .upload(phr_core::UploadRequest {
            owner_id: session.user_id,
            object_name,
            policy,
            wrapped_key_hex: key_blob,
            nonce_hex: iv,
            blob,
        })
        .map_err(|e| warp::reject::custom(ApiError(e)))?;

    Ok(warp::reply::with_status("created", warp::http::StatusCode::CREATED))
}

#[derive(Deserialize)]
struct RevokeBody {
    object_name: String,
    target_id: Option<String>,
}

async fn handle_revoke(
    session: Session,
    state: AppState,
    body: RevokeBody,
) -> Result<impl Reply, Rejection> {
    state
        .system
        .revoke(phr_core::RevokeRequest {
            caller_id: session.user_id,
            object_name: body.object_name,
            target_id: body.target_id,
        })
        .map_err(|e| warp::reject::custom(ApiError(e)))?;
    Ok(warp::reply::with_status("ok", warp::http::StatusCode::OK))
}

async fn handle_srs_public_key(state: AppState) -> Result<impl Reply, Rejection> {
    let pem = state
        .system
        .srs_public_key()
        .map_err(|e| warp::reject::custom(ApiError(e)))?;
    Ok(warp::reply::with_header(pem, "content-type", "application/x-pem-file"))
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn json_error(message: &str, status: warp::http::StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: message.to_string(),
        }),
        status,
    )
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if err.find::<MissingSession>().is_some() {
        return Ok(json_error("missing session", warp::http::StatusCode::UNAUTHORIZED));
    }
    if let Some(ApiError(inner)) = err.find::<ApiError>() {
        let status = warp::http::StatusCode::from_u16(inner.http_status())
            .unwrap_or(warp::http::StatusCode::INTERNAL_SERVER_ERROR);
        return Ok(json_error(&inner.to_string(), status));
    }
    Ok(json_error("not found", warp::http::StatusCode::NOT_FOUND))
}

/// Assembles the full route tree (spec §6.4 plus the ambient `/healthz`).
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let healthz = warp::path("healthz").and(warp::get()).map(|| "ok");

    let srs_public_key = warp::path!("srs" / "public-key")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_srs_public_key);

    let access = warp::path("access")
        .and(warp::post())
        .and(session_filter(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::json())
        .and_then(handle_access);

    let upload = warp::path("upload")
        .and(warp::post())
        .and(session_filter(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::multipart::form())
        .and_then(handle_upload);

    let revoke = warp::path("revoke")
        .and(warp::post())
        .and(session_filter(state.clone()))
        .and(with_state(state))
        .and(warp::body::json())
        .and_then(handle_revoke);

    healthz
        .or(srs_public_key)
        .or(access)
        .or(upload)
        .or(revoke)
        .recover(handle_rejection)
}
