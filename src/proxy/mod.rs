use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{header, HeaderMap, StatusCode, Uri};
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::shared::models::{AppState, ContainerRecord};

/// Pooled HTTP client used for forwarding sandbox traffic.
pub type ProxyClient = Client<HttpConnector, Body>;

pub fn new_client(idle_timeout: Duration) -> ProxyClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(idle_timeout)
        .build_http()
}

/// Extract the sandbox subdomain from a Host header. Only hostnames with at
/// least three labels whose leftmost label is a UUIDv4 are sandbox traffic;
/// everything else falls through to the main application.
pub fn subdomain_from_host(host: &str) -> Option<Uuid> {
    let hostname = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let id = Uuid::parse_str(labels[0]).ok()?;
    (id.get_version_num() == 4).then_some(id)
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONNECTION)
        .and_then(|h| h.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false)
}

/// Headers that must not be forwarded between hops. Upgrade-related headers
/// are put back for upgrade requests.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const WEBSOCKET_HEADERS: &[&str] = &[
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

fn prepare_forward_headers(headers: &mut HeaderMap, upgrade: bool, client_addr: Option<SocketAddr>) {
    let preserved: Vec<(header::HeaderName, header::HeaderValue)> = if upgrade {
        let mut kept = Vec::new();
        for name in [header::CONNECTION.as_str(), header::UPGRADE.as_str()]
            .iter()
            .chain(WEBSOCKET_HEADERS)
        {
            if let Some(value) = headers.get(*name) {
                if let Ok(parsed) = header::HeaderName::from_bytes(name.as_bytes()) {
                    kept.push((parsed, value.clone()));
                }
            }
        }
        kept
    } else {
        Vec::new()
    };

    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    for (name, value) in preserved {
        headers.insert(name, value);
    }

    // Standard forwarded-for chain
    if let Some(addr) = client_addr {
        let chain = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .map(|existing| format!("{}, {}", existing, addr.ip()))
            .unwrap_or_else(|| addr.ip().to_string());
        if let Ok(value) = chain.parse() {
            headers.insert("x-forwarded-for", value);
        }
    }
    if headers.get("x-forwarded-proto").is_none() {
        headers.insert("x-forwarded-proto", header::HeaderValue::from_static("http"));
    }
}

fn not_found_response(subdomain: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "error": "Container not found or not running",
            "subdomain": subdomain,
        })),
    )
        .into_response()
}

fn upstream_error_response(message: String) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        axum::Json(serde_json::json!({
            "error": "Proxy error",
            "message": message,
        })),
    )
        .into_response()
}

/// Outermost middleware: route sandbox-subdomain traffic into the matching
/// container, pass everything else on to the API router.
pub async fn proxy_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let Some(subdomain) = subdomain_from_host(host) else {
        return next.run(req).await;
    };
    let subdomain = subdomain.to_string();

    let record = match ContainerRecord::get_by_subdomain_running(&state.db, &subdomain).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found_response(&subdomain),
        Err(e) => {
            error!(subdomain = %subdomain, "Registry lookup failed: {}", e);
            return upstream_error_response("registry lookup failed".to_string());
        }
    };

    let response = forward(&state, &record, req).await;
    // Observed traffic drives idle reaping
    state.activity.touch(&subdomain).await;
    response
}

async fn forward(state: &Arc<AppState>, record: &ContainerRecord, mut req: Request) -> Response {
    let upgrade = is_upgrade_request(req.headers());
    let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut req));
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("http://127.0.0.1:{}{}", record.host_port, path_and_query);
    parts.uri = match target.parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            warn!(container = %record.id, "Invalid upstream URI {}: {}", target, e);
            return upstream_error_response("invalid upstream address".to_string());
        }
    };

    prepare_forward_headers(&mut parts.headers, upgrade, client_addr);

    debug!(
        method = %parts.method,
        subdomain = %record.subdomain,
        target = %parts.uri,
        upgrade,
        "Forwarding sandbox request"
    );

    let upstream_req = Request::from_parts(parts, body);
    let mut upstream_res = match tokio::time::timeout(
        state.config.proxy_timeout,
        state.proxy_client.request(upstream_req),
    )
    .await
    {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => {
            warn!(container = %record.id, "Upstream request failed: {}", e);
            return upstream_error_response(e.to_string());
        }
        Err(_) => {
            warn!(container = %record.id, "Upstream request timed out");
            return upstream_error_response("upstream timed out".to_string());
        }
    };

    if upstream_res.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let server_upgrade = hyper::upgrade::on(&mut upstream_res);
            tokio::spawn(tunnel(client_upgrade, server_upgrade));
            return upstream_res.map(|_| Body::empty());
        }
    }

    // Stream the upstream body straight through
    upstream_res.map(Body::new).into_response()
}

/// Bidirectional copy between the two upgraded connections. Runs detached;
/// errors after the 101 are not reportable to the client.
async fn tunnel(client_upgrade: OnUpgrade, server_upgrade: OnUpgrade) {
    let (client, server) = match tokio::join!(client_upgrade, server_upgrade) {
        (Ok(client), Ok(server)) => (client, server),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Upgrade failed: {}", e);
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut server = TokioIo::new(server);

    match tokio::io::copy_bidirectional(&mut client, &mut server).await {
        Ok((up, down)) => debug!(bytes_up = up, bytes_down = down, "Tunnel closed"),
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!("Tunnel connection reset")
        }
        Err(e) => warn!("Tunnel error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_requires_three_labels_and_a_uuid() {
        let id = Uuid::new_v4();

        assert_eq!(
            subdomain_from_host(&format!("{id}.train.example.com")),
            Some(id)
        );
        assert_eq!(subdomain_from_host(&format!("{id}.example.com")), Some(id));
        // Port is ignored
        assert_eq!(
            subdomain_from_host(&format!("{id}.example.com:8443")),
            Some(id)
        );

        // Two labels fall through even with a valid UUID
        assert_eq!(subdomain_from_host(&format!("{id}.localhost")), None);
        // Non-UUID leftmost label falls through
        assert_eq!(subdomain_from_host("app.train.example.com"), None);
        assert_eq!(subdomain_from_host("train.example.com"), None);
        assert_eq!(subdomain_from_host(""), None);
    }

    #[test]
    fn non_v4_uuids_fall_through() {
        // UUIDv1, valid syntax but wrong version
        assert_eq!(
            subdomain_from_host("f8b2e67a-1df2-11ee-be56-0242ac120002.example.com"),
            None
        );
    }

    #[test]
    fn forwarded_for_chain_is_appended() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
        let addr: SocketAddr = "192.168.1.5:51000".parse().unwrap();

        prepare_forward_headers(&mut headers, false, Some(addr));

        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "10.0.0.1, 192.168.1.5"
        );
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());

        prepare_forward_headers(&mut headers, false, None);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_some());
    }

    #[test]
    fn upgrade_headers_survive_for_websocket_requests() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "upgrade".parse().unwrap());
        headers.insert(header::UPGRADE, "websocket".parse().unwrap());
        headers.insert("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==".parse().unwrap());
        headers.insert("sec-websocket-version", "13".parse().unwrap());

        assert!(is_upgrade_request(&headers));
        prepare_forward_headers(&mut headers, true, None);

        assert_eq!(headers.get(header::CONNECTION).unwrap(), "upgrade");
        assert_eq!(headers.get(header::UPGRADE).unwrap(), "websocket");
        assert!(headers.get("sec-websocket-key").is_some());
        assert!(headers.get("sec-websocket-version").is_some());
    }

    #[test]
    fn mixed_connection_header_counts_as_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive, Upgrade".parse().unwrap());
        assert!(is_upgrade_request(&headers));

        let mut plain = HeaderMap::new();
        plain.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        assert!(!is_upgrade_request(&plain));
    }
}
