//! Control plane HTTP API
//!
//! Provides REST endpoints for zone management and agent registration, and
//! the WebSocket endpoint agents connect to for admission:
//! - Zone creation, listing and record appends
//! - Agent registration and operator authorization
//! - `/ws` upgrade into the admission handshake

use futures::Future;
use hyper::header::{
    HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tracing::{debug, error, info, warn};

use crate::dns::{validate_record, DnsError, Zone, ZoneStore};
use crate::eca::{serve_admitted, Admission, AdmissionHandler, EcaConfig, EcaRegistry, RegistryError, WsStream};

// =============================================================================
// API RESPONSE
// =============================================================================

/// Standard API response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: "Success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn success_message(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            data: None,
        }
    }
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Create zone request
#[derive(Debug, Deserialize)]
pub struct CreateZoneRequest {
    pub zone: String,
    #[serde(default)]
    pub users: Vec<String>,
}

/// Operator authorization request
#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub authorized: bool,
}

/// Registration response
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
}

// =============================================================================
// CONTROL API
// =============================================================================

/// Control plane API server
pub struct ControlApi {
    zones: Arc<ZoneStore>,
    registry: Arc<EcaRegistry>,
    admission: Arc<AdmissionHandler>,
    operator_token: Option<String>,
    sessions: Arc<Semaphore>,
}

impl ControlApi {
    /// Create a new API instance
    pub fn new(
        zones: Arc<ZoneStore>,
        registry: Arc<EcaRegistry>,
        admission: Arc<AdmissionHandler>,
        operator_token: Option<String>,
        max_sessions: usize,
    ) -> Self {
        Self {
            zones,
            registry,
            admission,
            operator_token,
            sessions: Arc::new(Semaphore::new(max_sessions)),
        }
    }

    /// Handle an incoming HTTP request
    pub async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!("Control API request: {} {}", method, path);

        let segments = path_segments(&path);
        let response = match (method, segments.as_slice()) {
            (Method::GET, ["health"]) => self.handle_health(),

            // Agents
            (Method::POST, ["ecas", "new"]) => self.handle_register_eca(req).await,
            (Method::GET, ["ecas", id]) => match self.check_operator(&req) {
                Ok(()) => self.handle_get_eca(id).await,
                Err(denied) => denied,
            },
            (Method::POST, ["ecas", id, "authorize"]) => match self.check_operator(&req) {
                Ok(()) => self.handle_authorize_eca(id, req).await,
                Err(denied) => denied,
            },

            // Zones
            (Method::POST, ["zones", "add"]) => self.handle_create_zone(req).await,
            (Method::GET, ["zones"]) => self.handle_list_zones().await,
            (Method::GET, ["zones", zone]) => self.handle_get_zone(zone).await,
            (Method::POST, ["records", zone, "add"]) => self.handle_add_record(zone, req).await,

            // Agent streams
            (Method::GET, ["ws"]) => self.handle_ws(req),

            _ => not_found(),
        };

        Ok(response)
    }

    // =========================================================================
    // HEALTH
    // =========================================================================

    fn handle_health(&self) -> Response<Body> {
        let response = serde_json::json!({
            "status": "healthy",
            "service": "packetframe-control",
            "sessions_available": self.sessions.available_permits(),
        });
        json_response(StatusCode::OK, &response)
    }

    // =========================================================================
    // AGENT HANDLERS
    // =========================================================================

    async fn handle_register_eca(&self, req: Request<Body>) -> Response<Body> {
        let config = match parse_body::<EcaConfig>(req).await {
            Ok(c) => c,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e),
        };

        match self.registry.register(config).await {
            Ok(id) => json_response(StatusCode::OK, &RegisterResponse { id: id.to_string() }),
            Err(e) => registry_error_response(e),
        }
    }

    async fn handle_get_eca(&self, id: &str) -> Response<Body> {
        match self.registry.lookup(id).await {
            Ok(eca) => json_response(StatusCode::OK, &ApiResponse::success(eca)),
            Err(e) => registry_error_response(e),
        }
    }

    async fn handle_authorize_eca(&self, id: &str, req: Request<Body>) -> Response<Body> {
        let eca_id = match id.parse() {
            Ok(eca_id) => eca_id,
            Err(e) => return registry_error_response(RegistryError::InvalidId(e)),
        };
        let body = match parse_body::<AuthorizeRequest>(req).await {
            Ok(b) => b,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e),
        };

        match self.registry.set_authorized(&eca_id, body.authorized).await {
            Ok(()) => json_response(
                StatusCode::OK,
                &ApiResponse::success(serde_json::json!({ "id": id, "authorized": body.authorized })),
            ),
            Err(e) => registry_error_response(e),
        }
    }

    /// Check the operator bearer token in constant time
    fn check_operator(&self, req: &Request<Body>) -> Result<(), Response<Body>> {
        let Some(expected) = self.operator_token.as_deref() else {
            warn!("Operator request refused: no operator token configured");
            return Err(json_error(StatusCode::FORBIDDEN, "Operator endpoints are disabled"));
        };

        let provided = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer);

        match provided {
            None => {
                warn!("Operator request without token: {}", req.uri().path());
                Err(json_error(StatusCode::UNAUTHORIZED, "Missing operator token"))
            }
            Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
            Some(_) => {
                warn!("Operator request with invalid token: {}", req.uri().path());
                Err(json_error(StatusCode::FORBIDDEN, "Invalid operator token"))
            }
        }
    }

    // =========================================================================
    // ZONE HANDLERS
    // =========================================================================

    async fn handle_create_zone(&self, req: Request<Body>) -> Response<Body> {
        let body = match parse_body::<CreateZoneRequest>(req).await {
            Ok(b) => b,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e),
        };

        let zone = Zone::new(body.zone).with_users(body.users);
        match self.zones.create_zone(zone).await {
            Ok(_) => json_response(StatusCode::OK, &ApiResponse::success_message("Zone created")),
            Err(e) => dns_error_response(e),
        }
    }

    async fn handle_list_zones(&self) -> Response<Body> {
        match self.zones.list_zones().await {
            Ok(zones) => json_response(StatusCode::OK, &ApiResponse::success(zones)),
            Err(e) => dns_error_response(e),
        }
    }

    async fn handle_get_zone(&self, zone: &str) -> Response<Body> {
        match self.zones.get_zone(zone).await {
            Ok(zone) => json_response(StatusCode::OK, &ApiResponse::success(zone)),
            Err(e) => dns_error_response(e),
        }
    }

    async fn handle_add_record(&self, zone: &str, req: Request<Body>) -> Response<Body> {
        let fields = match parse_body::<Value>(req).await {
            Ok(v) => v,
            Err(e) => return json_error(StatusCode::BAD_REQUEST, &e),
        };

        let record = match validate_record(&fields) {
            Ok(record) => record,
            Err(e) => return dns_error_response(e.into()),
        };

        match self.zones.append_record(zone, record).await {
            Ok(()) => json_response(StatusCode::OK, &ApiResponse::success_message("Record added")),
            Err(e) => dns_error_response(e),
        }
    }

    // =========================================================================
    // AGENT STREAMS
    // =========================================================================

    /// Answer a WebSocket upgrade and run the admission handshake on the
    /// upgraded connection
    fn handle_ws(&self, req: Request<Body>) -> Response<Body> {
        if !is_websocket_upgrade(&req) {
            return json_error(StatusCode::BAD_REQUEST, "Expected a WebSocket upgrade");
        }
        let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
            return json_error(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
        };
        let accept = match HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
            Ok(accept) => accept,
            Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid Sec-WebSocket-Key"),
        };

        let permit = match self.sessions.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Agent session limit reached, refusing upgrade");
                return json_error(StatusCode::SERVICE_UNAVAILABLE, "Too many agent sessions");
            }
        };

        let admission = Arc::clone(&self.admission);
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let stream = WsStream::from_upgraded(upgraded).await;
                    if let Admission::Authorized { eca, stream } = admission.admit(stream).await {
                        serve_admitted(stream, eca.id).await;
                    }
                }
                Err(e) => warn!("WebSocket upgrade failed: {}", e),
            }
            drop(permit);
        });

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = response.headers_mut();
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
        response
    }

    /// Run the API server (convenience method)
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        run_control_api(addr, self).await
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Bind the API server without running it. Returns the bound address.
pub fn bind_control_api(
    addr: SocketAddr,
    api: Arc<ControlApi>,
) -> anyhow::Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>)> {
    let make_svc = make_service_fn(move |_conn| {
        let api = Arc::clone(&api);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let api = Arc::clone(&api);
                async move { api.handle_request(req).await }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    Ok((server.local_addr(), server))
}

/// Run the control API server
pub async fn run_control_api(addr: SocketAddr, api: Arc<ControlApi>) -> anyhow::Result<()> {
    let (local_addr, server) = bind_control_api(addr, api)?;
    info!("Control API listening on http://{}", local_addr);
    server.await?;
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Parse JSON body from request
async fn parse_body<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, String> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| format!("Failed to read body: {}", e))?;

    serde_json::from_slice(&bytes).map_err(|e| format!("Invalid JSON: {}", e))
}

/// Create JSON response
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Body::from(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create JSON error response
fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &ApiResponse::<()>::error(message))
}

fn not_found() -> Response<Body> {
    json_error(StatusCode::NOT_FOUND, "Endpoint not found")
}

fn dns_error_response(err: DnsError) -> Response<Body> {
    match &err {
        DnsError::InvalidName(_) | DnsError::Validation(_) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
        DnsError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, &err.to_string()),
        DnsError::ZoneNotFound(_) => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        DnsError::Store(e) => {
            error!("Zone storage failure: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
        }
    }
}

fn registry_error_response(err: RegistryError) -> Response<Body> {
    match &err {
        RegistryError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
        RegistryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        RegistryError::Store(e) => {
            error!("Agent storage failure: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure")
        }
    }
}

/// Split a path into its non-empty segments
fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Extract token from an Authorization header value
fn extract_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

fn header_has_token(req: &Request<Body>, name: hyper::header::HeaderName, token: &str) -> bool {
    req.headers()
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    header_has_token(req, CONNECTION, "upgrade") && header_has_token(req, UPGRADE, "websocket")
}
