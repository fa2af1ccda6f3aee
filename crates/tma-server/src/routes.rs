//! HTTP routes for the launch-data API.

use std::path::PathBuf;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use tma_core::{
    credential,
    domain::{SessionDescriptor, SessionKind},
    errors::Error,
    flows::{ExportRequest, JoinRequest, LaunchRequest},
    proxy::ProxyConfig,
};

use crate::{error::error_response, AppState};

/// Request body for `/api/getTgWebAppData`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchDataRequest {
    pub session_type: SessionKind,
    pub id: String,
    pub path_directory: PathBuf,
    pub proxy: String,
    pub service: String,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub is_upload: bool,
    /// JSON-encoded string, not a nested object.
    #[serde(default)]
    pub api_json: Option<String>,
}

/// Request body for `/api/joinChannels`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChannelsRequest {
    pub session_type: SessionKind,
    pub id: String,
    pub path_directory: PathBuf,
    pub proxy: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub is_upload: bool,
    #[serde(default)]
    pub api_json: Option<String>,
}

/// Request body for `/api/createTData`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTDataRequest {
    pub session_type: SessionKind,
    pub id: String,
    pub path_directory: PathBuf,
    pub proxy: String,
    #[serde(default)]
    pub is_upload: bool,
    #[serde(default)]
    pub api_json: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/getTgWebAppData", post(get_tg_web_app_data))
        .route("/api/joinChannels", post(join_channels))
        .route("/api/createTData", post(create_t_data))
        .with_state(state)
}

/// POST /api/getTgWebAppData - run a provider's web-view flow and
/// return the extracted launch payload.
async fn get_tg_web_app_data(
    State(state): State<AppState>,
    payload: Result<Json<LaunchDataRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let result = match payload {
        Ok(Json(req)) => launch(&state, req).await,
        Err(rejection) => Err(Error::Validation(rejection.body_text())),
    };
    match result {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => error_response(&state.journal, "getTgWebAppData", e),
    }
}

async fn launch(state: &AppState, req: LaunchDataRequest) -> Result<Value, Error> {
    let proxy: ProxyConfig = req.proxy.parse()?;
    let descriptor = build_descriptor(
        req.session_type,
        req.id,
        req.path_directory,
        req.api_json.as_deref(),
        req.is_upload,
    )?;

    let outcome = state
        .flows
        .fetch_launch_data(LaunchRequest {
            descriptor,
            proxy,
            service: req.service,
            // An empty referral code is the same as no referral code.
            referral_code: req.referral_code.filter(|code| !code.is_empty()),
        })
        .await?;

    Ok(json!({
        "status": "success",
        "tgWebAppData": outcome.payload.tg_web_app_data,
        "authUrl": outcome.payload.auth_url,
        "number": outcome.phone,
        "apiJson": serde_json::to_string(&outcome.credential.to_api_json())?,
        "username": outcome.username,
    }))
}

/// POST /api/joinChannels - join, mute and archive each channel the
/// account is not already in.
async fn join_channels(
    State(state): State<AppState>,
    payload: Result<Json<JoinChannelsRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let result = match payload {
        Ok(Json(req)) => join(&state, req).await,
        Err(rejection) => Err(Error::Validation(rejection.body_text())),
    };
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Err(e) => error_response(&state.journal, "joinChannels", e),
    }
}

async fn join(state: &AppState, req: JoinChannelsRequest) -> Result<(), Error> {
    let proxy: ProxyConfig = req.proxy.parse()?;
    let descriptor = build_descriptor(
        req.session_type,
        req.id,
        req.path_directory,
        req.api_json.as_deref(),
        req.is_upload,
    )?;
    state
        .flows
        .join_channels(JoinRequest {
            descriptor,
            proxy,
            channels: req.channels,
        })
        .await
}

/// POST /api/createTData - export the live session to desktop format.
async fn create_t_data(
    State(state): State<AppState>,
    payload: Result<Json<CreateTDataRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let result = match payload {
        Ok(Json(req)) => export(&state, req).await,
        Err(rejection) => Err(Error::Validation(rejection.body_text())),
    };
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Err(e) => error_response(&state.journal, "createTData", e),
    }
}

async fn export(state: &AppState, req: CreateTDataRequest) -> Result<(), Error> {
    let proxy: ProxyConfig = req.proxy.parse()?;
    let descriptor = build_descriptor(
        req.session_type,
        req.id,
        req.path_directory,
        req.api_json.as_deref(),
        req.is_upload,
    )?;
    state
        .flows
        .export_session(ExportRequest { descriptor, proxy })
        .await
}

/// Build the validated descriptor from the wire fields. Desktop (tdata)
/// sessions carry their own credential after conversion, so `apiJson`
/// is required only for native sessions.
fn build_descriptor(
    kind: SessionKind,
    id: String,
    path_directory: PathBuf,
    api_json: Option<&str>,
    is_upload: bool,
) -> Result<SessionDescriptor, Error> {
    let credential = match api_json {
        Some(raw) => Some(credential::parse_api_json(raw)?),
        None => None,
    };

    if kind == SessionKind::Native && credential.is_none() {
        return Err(Error::Validation(
            "apiJson is required for telethon sessions".to_string(),
        ));
    }

    Ok(SessionDescriptor {
        id,
        path_directory,
        kind,
        credential,
        is_upload,
    })
}
