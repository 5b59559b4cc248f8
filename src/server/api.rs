//! REST API for token and interaction management.
//!
//! All routes sit behind bearer-key authentication. Every auth failure
//! collapses to the same `401 {"error":"unauthorized"}`, and ownership
//! failures collapse to `404 {"error":"token not found"}`, so callers can
//! not probe for other tenants' keys or tokens.

use crate::api::{
    format_timestamp, CreateTokenRequest, CreateTokenResponse, DeleteTokenResponse,
    DnsInteractionDetail, GetInteractionsResponse, HttpInteractionDetail, InteractionResponse,
    ListPluginsResponse, ListTokensResponse, TokenInfo,
};
use crate::auth;
use crate::config::SharedConfig;
use crate::db::Db;
use crate::plugins::Pipeline;
use crate::token;
use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

const MAX_BODY_BYTES: usize = 1 << 16;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_CREATE_ATTEMPTS: usize = 5;

/// The authenticated API key id, attached to the request by the auth
/// middleware for downstream ownership checks.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyId(pub i64);

#[derive(Clone)]
pub struct ApiState {
    pub config: SharedConfig,
    pub db: Db,
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/tokens", post(create_token))
        .route("/v1/tokens", get(list_tokens))
        .route("/v1/tokens/{token}/interactions", get(get_interactions))
        .route("/v1/tokens/{token}", delete(delete_token))
        .route("/v1/plugins", get(list_plugins))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

/// Bearer-key authentication. Parse, prefix lookup, revocation check, and
/// constant-time hash comparison; any failure is the same 401.
async fn authenticate(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(bearer) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return unauthorized();
    };

    let Ok((prefix, _)) = auth::parse_api_key(bearer) else {
        return unauthorized();
    };

    let stored = match state.db.get_api_key_by_prefix(prefix).await {
        Ok(Some(key)) => key,
        Ok(None) => return unauthorized(),
        Err(err) => {
            error!(error = %err, "api key lookup failed");
            return unauthorized();
        }
    };

    if stored.revoked_at.is_some() {
        return unauthorized();
    }

    if !auth::verify_api_key(bearer, &stored.key_hash) {
        return unauthorized();
    }

    request.extensions_mut().insert(ApiKeyId(stored.id));
    next.run(request).await
}

async fn create_token(
    State(state): State<ApiState>,
    Extension(ApiKeyId(api_key_id)): Extension<ApiKeyId>,
    body: Bytes,
) -> Response {
    let request = match parse_create_request(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    // UNIQUE collisions on the 12-char value are vanishingly rare; retry a
    // few times before giving up.
    let mut created: Option<String> = None;
    for _ in 0..TOKEN_CREATE_ATTEMPTS {
        let candidate = token::generate();
        match state
            .db
            .create_token(&candidate, Some(api_key_id), request.label.as_deref())
            .await
        {
            Ok(_) => {
                created = Some(candidate);
                break;
            }
            Err(err) => {
                warn!(error = %err, "token insert failed, retrying");
            }
        }
    }
    let Some(token_value) = created else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create token");
    };

    let domain = &state.config.domain;
    let mut payloads = HashMap::from([
        ("dns".to_string(), format!("{token_value}.{domain}")),
        ("http".to_string(), format!("http://{token_value}.{domain}/")),
        ("https".to_string(), format!("https://{token_value}.{domain}/")),
    ]);
    if !state.config.public_ip.is_empty() {
        let ip = &state.config.public_ip;
        payloads.insert("http_ip".to_string(), format!("http://{ip}/oast/{token_value}"));
        payloads.insert("https_ip".to_string(), format!("https://{ip}/oast/{token_value}"));
    }

    Json(CreateTokenResponse {
        token: token_value,
        payloads,
    })
    .into_response()
}

/// Decode the create-token body: 64 KiB cap, unknown fields rejected, and
/// nothing allowed after the JSON document. An empty body is a bare create.
fn parse_create_request(body: &Bytes) -> Result<CreateTokenRequest, Response> {
    if body.len() > MAX_BODY_BYTES {
        return Err(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "request body too large",
        ));
    }
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(CreateTokenRequest::default());
    }

    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let request = CreateTokenRequest::deserialize(&mut deserializer)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid JSON"))?;
    deserializer.end().map_err(|_| {
        error_response(StatusCode::BAD_REQUEST, "unexpected trailing data")
    })?;
    Ok(request)
}

async fn list_tokens(
    State(state): State<ApiState>,
    Extension(ApiKeyId(api_key_id)): Extension<ApiKeyId>,
) -> Response {
    let tokens = match state.db.list_tokens_by_api_key(api_key_id).await {
        Ok(tokens) => tokens,
        Err(err) => {
            error!(error = %err, "list tokens failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    };

    let tokens = tokens
        .into_iter()
        .map(|t| TokenInfo {
            token: t.token,
            label: t.label,
            created_at: format_timestamp(t.created_at),
            interaction_count: t.interaction_count,
        })
        .collect();

    Json(ListTokensResponse { tokens }).into_response()
}

async fn get_interactions(
    State(state): State<ApiState>,
    Extension(ApiKeyId(api_key_id)): Extension<ApiKeyId>,
    Path(token_value): Path<String>,
) -> Response {
    let owned = match lookup_owned_token(&state, &token_value, api_key_id).await {
        Ok(token) => token,
        Err(response) => return response,
    };

    let interactions = match state.db.get_interactions_by_token(owned.id).await {
        Ok(interactions) => interactions,
        Err(err) => {
            error!(error = %err, "list interactions failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    };

    let mut out = Vec::with_capacity(interactions.len());
    for interaction in interactions {
        let mut response = InteractionResponse {
            id: interaction.id,
            kind: interaction.kind.clone(),
            occurred_at: format_timestamp(interaction.occurred_at),
            remote_ip: interaction.remote_ip,
            remote_port: interaction.remote_port as u16,
            tls: interaction.tls,
            summary: interaction.summary,
            http: None,
            dns: None,
        };

        if interaction.kind == "http" {
            match state.db.get_http_interaction(interaction.id).await {
                Ok(Some(detail)) => {
                    let headers: HashMap<String, Vec<String>> =
                        serde_json::from_str(&detail.request_headers).unwrap_or_else(|err| {
                            warn!(interaction_id = interaction.id, error = %err,
                                "failed to parse stored request headers");
                            HashMap::new()
                        });
                    response.http = Some(HttpInteractionDetail {
                        method: detail.method,
                        scheme: detail.scheme,
                        host: detail.host,
                        path: detail.path,
                        query: detail.query,
                        headers,
                        body: BASE64.encode(detail.request_body.unwrap_or_default()),
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    error!(interaction_id = interaction.id, error = %err,
                        "failed to get http interaction details");
                }
            }
        }

        if interaction.kind == "dns" {
            match state.db.get_dns_interaction(interaction.id).await {
                Ok(Some(detail)) => {
                    response.dns = Some(DnsInteractionDetail {
                        qname: detail.qname,
                        qtype: detail.qtype as u16,
                        qclass: detail.qclass as u16,
                        rd: detail.rd != 0,
                        opcode: detail.opcode as u8,
                        dns_id: detail.dns_id as u16,
                        protocol: detail.protocol,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    error!(interaction_id = interaction.id, error = %err,
                        "failed to get dns interaction details");
                }
            }
        }

        out.push(response);
    }

    Json(GetInteractionsResponse {
        token: token_value,
        interactions: out,
    })
    .into_response()
}

async fn delete_token(
    State(state): State<ApiState>,
    Extension(ApiKeyId(api_key_id)): Extension<ApiKeyId>,
    Path(token_value): Path<String>,
) -> Response {
    if let Err(response) = lookup_owned_token(&state, &token_value, api_key_id).await {
        return response;
    }

    if let Err(err) = state.db.delete_token(&token_value).await {
        error!(error = %err, "delete token failed");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete token");
    }

    Json(DeleteTokenResponse { deleted: true }).into_response()
}

async fn list_plugins(State(state): State<ApiState>) -> Response {
    Json(ListPluginsResponse {
        plugins: state.pipeline.list_plugins(),
    })
    .into_response()
}

/// Fetch a token and verify ownership. A token owned by a different key is
/// reported identically to a missing one.
async fn lookup_owned_token(
    state: &ApiState,
    token_value: &str,
    api_key_id: i64,
) -> Result<crate::db::Token, Response> {
    if token_value.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "token required"));
    }

    let token = match state.db.get_token_by_value(token_value).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            return Err(error_response(StatusCode::NOT_FOUND, "token not found"));
        }
        Err(err) => {
            error!(error = %err, "token lookup failed");
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
            ));
        }
    };

    if token.api_key_id != Some(api_key_id) {
        return Err(error_response(StatusCode::NOT_FOUND, "token not found"));
    }

    Ok(token)
}
