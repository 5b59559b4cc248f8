//! HTTP(S) capture listener.
//!
//! Every request is answered, whatever happens: ACME challenge lookups get
//! the key authorization, invalid hosts get 404, everything else flows
//! through the pipeline and ends in the plan's response (`200 ok` when no
//! plugin overrides it, and on any capture-path failure).

use crate::acme::Http01Challenges;
use crate::config::SharedConfig;
use crate::events::{HttpDraft, HttpEvent, InteractionDraft, Kind};
use crate::plugins::Pipeline;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::HOST;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";
const MAX_CAPTURE_BODY: usize = 1 << 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct CaptureState {
    pub config: SharedConfig,
    pub pipeline: Arc<Pipeline>,
    pub http01: Arc<Http01Challenges>,
    /// Whether this instance fronts the TLS listener.
    pub tls: bool,
}

pub fn router(state: CaptureState) -> Router {
    Router::new()
        .fallback(capture)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn capture(
    State(state): State<CaptureState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();

    if let Some(challenge_token) = path.strip_prefix(ACME_CHALLENGE_PREFIX) {
        return match state.http01.get(challenge_token) {
            Some(key_authorization) => (StatusCode::OK, key_authorization).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let raw_host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let host = strip_host_port(&raw_host);

    if !host_is_valid(&host, &state.config.domain, &state.config.public_ip) {
        debug!(host = %raw_host, "rejected request for foreign host");
        return StatusCode::NOT_FOUND.into_response();
    }

    let token = extract_token(&host, &path, &state.config.domain);
    if token.is_empty() {
        return (StatusCode::OK, "ok").into_response();
    }

    let method = request.method().to_string();
    let proto = format!("{:?}", request.version());
    let query = request.uri().query().unwrap_or_default().to_string();
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for name in request.headers().keys() {
        let values = request
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(ToString::to_string)
            .collect();
        headers.insert(canonical_header_name(name.as_str()), values);
    }

    let body = read_body_capped(request.into_body(), MAX_CAPTURE_BODY).await;

    let scheme = if state.tls { "https" } else { "http" };
    let draft = InteractionDraft {
        token_value: token.clone(),
        kind: Some(Kind::Http),
        occurred_at: crate::db::now_unix(),
        remote_ip: client_addr.ip().to_string(),
        remote_port: client_addr.port(),
        tls: state.tls,
        summary: format!("{method} {path} {proto}"),
        http: Some(HttpDraft {
            method,
            scheme: scheme.to_string(),
            host: raw_host,
            path,
            query,
            proto,
            headers,
            body,
        }),
        ..Default::default()
    };

    let mut event = HttpEvent::new(draft);
    if let Err(err) = state.pipeline.process_http(&mut event).await {
        error!(token = %token, error = %err, "pipeline failed for http capture");
        return (StatusCode::OK, "ok").into_response();
    }

    write_plan(event)
}

fn write_plan(event: HttpEvent) -> Response {
    let plan = event.response;
    let status = StatusCode::from_u16(plan.status).unwrap_or(StatusCode::OK);
    let mut response = Response::builder().status(status);
    if let Some(header_map) = response.headers_mut() {
        for (name, value) in &plan.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                header_map.insert(name, value);
            }
        }
    }
    response
        .body(Body::from(plan.body))
        .unwrap_or_else(|_| StatusCode::OK.into_response())
}

/// Read the request body, truncating at `cap` bytes. Read errors yield
/// whatever arrived before them.
async fn read_body_capped(body: Body, cap: usize) -> Vec<u8> {
    let mut collected: Vec<u8> = Vec::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        let remaining = cap - collected.len();
        if chunk.len() >= remaining {
            collected.extend_from_slice(&chunk[..remaining]);
            break;
        }
        collected.extend_from_slice(&chunk);
    }
    collected
}

/// Strip a `:port` suffix and IPv6 brackets from a host header value.
pub fn strip_host_port(host: &str) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }
    match host.rsplit_once(':') {
        // A bare IPv6 address contains multiple colons and no brackets.
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host.to_string(),
    }
}

/// Accept only the apex itself, its subdomains, or the configured public IP.
pub fn host_is_valid(host: &str, domain: &str, public_ip: &str) -> bool {
    let host = host.to_lowercase();
    let domain = domain.to_lowercase();
    host == domain
        || host.ends_with(&format!(".{domain}"))
        || (!public_ip.is_empty() && host == public_ip)
}

/// Extract a capture token from the host or the `/oast/<token>` path.
///
/// For `foo.<token>.<domain>` the label adjacent to the domain wins, so
/// testers can prefix arbitrary data to their payload host.
pub fn extract_token(host: &str, path: &str, domain: &str) -> String {
    let host = host.to_lowercase();
    let domain = domain.to_lowercase();

    if let Some(subdomain) = host.strip_suffix(&format!(".{domain}")) {
        let label = subdomain.rsplit('.').next().unwrap_or_default();
        if !label.is_empty() {
            return label.to_string();
        }
    }

    if let Some(rest) = path.strip_prefix("/oast/") {
        let token = rest.split('/').next().unwrap_or_default();
        if !token.is_empty() {
            return token.to_string();
        }
    }

    String::new()
}

/// Render a lowercase header name in the canonical `X-Custom-Header` form
/// it arrived in on the wire.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_from_subdomain() {
        assert_eq!(
            extract_token("abcdef123456.oastrix.example.com", "/", "oastrix.example.com"),
            "abcdef123456"
        );
        // The label adjacent to the domain wins over prefixed data.
        assert_eq!(
            extract_token("data.tok123.oastrix.example.com", "/", "oastrix.example.com"),
            "tok123"
        );
    }

    #[test]
    fn no_token_for_bare_domain() {
        assert_eq!(extract_token("oastrix.example.com", "/", "oastrix.example.com"), "");
        assert_eq!(extract_token("other.example.net", "/", "oastrix.example.com"), "");
    }

    #[test]
    fn token_from_oast_path() {
        assert_eq!(
            extract_token("192.0.2.10", "/oast/sometoken123", "oastrix.example.com"),
            "sometoken123"
        );
        assert_eq!(
            extract_token("192.0.2.10", "/oast/tok/extra/path", "oastrix.example.com"),
            "tok"
        );
        assert_eq!(extract_token("192.0.2.10", "/oast/", "oastrix.example.com"), "");
    }

    #[test]
    fn host_port_stripping() {
        assert_eq!(strip_host_port("example.com:8080"), "example.com");
        assert_eq!(strip_host_port("example.com"), "example.com");
        assert_eq!(strip_host_port("[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(strip_host_port("[2001:db8::1]"), "2001:db8::1");
        assert_eq!(strip_host_port("192.0.2.10:80"), "192.0.2.10");
    }

    #[test]
    fn host_validation() {
        let domain = "oastrix.example.com";
        assert!(host_is_valid("oastrix.example.com", domain, ""));
        assert!(host_is_valid("tok.oastrix.example.com", domain, ""));
        assert!(host_is_valid("192.0.2.10", domain, "192.0.2.10"));
        assert!(!host_is_valid("evil.com", domain, "192.0.2.10"));
        assert!(!host_is_valid("oastrix.example.com.evil.com", domain, ""));
        assert!(!host_is_valid("192.0.2.10", domain, ""));
    }

    #[test]
    fn header_names_render_canonically() {
        assert_eq!(canonical_header_name("x-custom-header"), "X-Custom-Header");
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("host"), "Host");
    }

    #[tokio::test]
    async fn body_reads_are_capped() {
        let body = Body::from(vec![7u8; 64]);
        let read = read_body_capped(body, 16).await;
        assert_eq!(read.len(), 16);

        let body = Body::from(vec![7u8; 8]);
        let read = read_body_capped(body, 16).await;
        assert_eq!(read.len(), 8);
    }
}
