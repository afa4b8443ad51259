//! Admission Protocol Handler
//!
//! Runs the single-message handshake on a freshly opened agent stream:
//!
//! ```text
//! Opened → AwaitingRequest → IdentityParsed | RejectedMalformed
//!        → LookedUp | RejectedNotFound → Authorized | RejectedUnauthorized
//! ```
//!
//! plus `RejectedTimeout` and `Disconnected`. Every outcome except
//! `Disconnected` sends exactly one `{"permitted", "message"}` reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{Eca, EcaId, EcaRegistry, HandshakeStream, RegistryError};

/// Reply sent on successful admission
pub const ACCEPTED_MESSAGE: &str = "Accepted connection request";

/// Default time allowed for the identity message
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Opened,
    AwaitingRequest,
    IdentityParsed,
    LookedUp,
    Authorized,
    RejectedMalformed,
    RejectedNotFound,
    RejectedUnauthorized,
    RejectedTimeout,
    RejectedInternal,
    Disconnected,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            HandshakeState::Opened
                | HandshakeState::AwaitingRequest
                | HandshakeState::IdentityParsed
                | HandshakeState::LookedUp
        )
    }
}

/// The server's handshake reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub permitted: bool,
    pub message: String,
}

/// Why an agent was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// First message was not a JSON object
    Malformed,
    /// `id` missing, not a string or not a well-formed id
    InvalidId,
    /// Well-formed id with no registered agent
    UnknownId,
    /// Registered but not authorized
    NotAuthorized,
    /// No identity message within the handshake timeout
    Timeout,
    /// The registry could not be consulted
    Internal,
}

impl Rejection {
    /// Message sent to the agent
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::Malformed => "Malformed connection request",
            Rejection::InvalidId => "Invalid node ID",
            Rejection::UnknownId => "Unknown node ID",
            Rejection::NotAuthorized => "Not authorized",
            Rejection::Timeout => "Connection request timed out",
            Rejection::Internal => "Internal error",
        }
    }

    /// Terminal state this rejection ends in
    pub fn state(&self) -> HandshakeState {
        match self {
            Rejection::Malformed | Rejection::InvalidId => HandshakeState::RejectedMalformed,
            Rejection::UnknownId => HandshakeState::RejectedNotFound,
            Rejection::NotAuthorized => HandshakeState::RejectedUnauthorized,
            Rejection::Timeout => HandshakeState::RejectedTimeout,
            Rejection::Internal => HandshakeState::RejectedInternal,
        }
    }
}

/// Outcome of a handshake
///
/// Only `Authorized` hands the stream back; rejected streams are closed and
/// dropped inside the handler.
#[must_use]
pub enum Admission<S> {
    Authorized { eca: Eca, stream: S },
    Rejected(Rejection),
    Disconnected,
}

impl<S> Admission<S> {
    pub fn state(&self) -> HandshakeState {
        match self {
            Admission::Authorized { .. } => HandshakeState::Authorized,
            Admission::Rejected(rejection) => rejection.state(),
            Admission::Disconnected => HandshakeState::Disconnected,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Admission::Authorized { .. })
    }
}

impl<S> std::fmt::Debug for Admission<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Authorized { eca, .. } => f.debug_struct("Authorized").field("eca", &eca.id).finish(),
            Admission::Rejected(rejection) => f.debug_tuple("Rejected").field(rejection).finish(),
            Admission::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Decision reached before anything is sent. Delivering it consumes it.
#[must_use]
enum Verdict {
    Admit(Eca),
    Reject(Rejection),
}

impl Verdict {
    fn response(&self) -> AdmissionResponse {
        match self {
            Verdict::Admit(_) => AdmissionResponse {
                permitted: true,
                message: ACCEPTED_MESSAGE.to_string(),
            },
            Verdict::Reject(rejection) => AdmissionResponse {
                permitted: false,
                message: rejection.message().to_string(),
            },
        }
    }

    async fn deliver<S: HandshakeStream>(self, mut stream: S) -> Admission<S> {
        let response = self.response();
        let text = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());

        match self {
            Verdict::Admit(eca) => {
                if let Err(e) = stream.send_text(text).await {
                    debug!("Failed to send admission to ECA {}: {}", eca.id, e);
                    return Admission::Disconnected;
                }
                info!("Admitted ECA {} ({})", eca.id, eca.config.name);
                Admission::Authorized { eca, stream }
            }
            Verdict::Reject(rejection) => {
                if let Err(e) = stream.send_text(text).await {
                    debug!("Failed to send rejection: {}", e);
                }
                if let Err(e) = stream.close().await {
                    debug!("Failed to close rejected stream: {}", e);
                }
                debug!("Handshake state: {:?}", rejection.state());
                Admission::Rejected(rejection)
            }
        }
    }
}

/// Per-connection admission handshake
pub struct AdmissionHandler {
    registry: Arc<EcaRegistry>,
    handshake_timeout: Duration,
}

impl AdmissionHandler {
    pub fn new(registry: Arc<EcaRegistry>, handshake_timeout: Duration) -> Self {
        Self {
            registry,
            handshake_timeout,
        }
    }

    /// Run the handshake on `stream`
    pub async fn admit<S: HandshakeStream>(&self, mut stream: S) -> Admission<S> {
        debug!("Handshake state: {:?}", HandshakeState::Opened);
        debug!("Handshake state: {:?}", HandshakeState::AwaitingRequest);

        let request = match timeout(self.handshake_timeout, stream.recv_text()).await {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => {
                debug!("Peer closed before sending a connection request");
                return Admission::Disconnected;
            }
            Ok(Err(e)) if e.is_malformed() => {
                warn!("Rejected connection request: {}", e);
                return Verdict::Reject(Rejection::Malformed).deliver(stream).await;
            }
            Ok(Err(e)) => {
                debug!("Stream failed before connection request: {}", e);
                return Admission::Disconnected;
            }
            Err(_) => {
                warn!("Connection request timed out after {:?}", self.handshake_timeout);
                return Verdict::Reject(Rejection::Timeout).deliver(stream).await;
            }
        };

        self.decide(&request).await.deliver(stream).await
    }

    async fn decide(&self, request: &str) -> Verdict {
        let id = match parse_request(request) {
            Ok(id) => id,
            Err(rejection) => {
                warn!("Rejected connection request: {}", rejection.message());
                return Verdict::Reject(rejection);
            }
        };
        debug!("Handshake state: {:?} ({})", HandshakeState::IdentityParsed, id);

        let eca = match self.registry.lookup_id(&id).await {
            Ok(eca) => eca,
            Err(RegistryError::NotFound(_)) => {
                warn!("Rejected unknown ECA {}", id);
                return Verdict::Reject(Rejection::UnknownId);
            }
            Err(RegistryError::InvalidId(_)) => return Verdict::Reject(Rejection::InvalidId),
            Err(RegistryError::Store(e)) => {
                error!("ECA lookup failed for {}: {}", id, e);
                return Verdict::Reject(Rejection::Internal);
            }
        };
        debug!("Handshake state: {:?} ({})", HandshakeState::LookedUp, id);

        if EcaRegistry::is_authorized(&eca) {
            Verdict::Admit(eca)
        } else {
            warn!("Rejected unauthorized ECA {}", id);
            Verdict::Reject(Rejection::NotAuthorized)
        }
    }
}

/// Extract the agent id from the first message
fn parse_request(text: &str) -> Result<EcaId, Rejection> {
    let value: Value = serde_json::from_str(text).map_err(|_| Rejection::Malformed)?;
    let request = value.as_object().ok_or(Rejection::Malformed)?;

    match request.get("id") {
        Some(Value::String(raw)) => raw.parse().map_err(|_| Rejection::InvalidId),
        _ => Err(Rejection::InvalidId),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsRecord, Zone};
    use crate::eca::{EcaConfig, TransportError};
    use crate::store::{DocumentStore, MemoryStore, StoreError, UpdateOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Stream double fed from a channel; records what the handler sends
    struct ChannelStream {
        incoming: mpsc::UnboundedReceiver<Option<String>>,
        sent: Vec<String>,
        closed: bool,
    }

    #[async_trait]
    impl HandshakeStream for ChannelStream {
        async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
            Ok(self.incoming.recv().await.flatten())
        }

        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            assert!(!self.closed, "send after close");
            self.sent.push(text);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed = true;
            Ok(())
        }
    }

    fn channel_stream() -> (mpsc::UnboundedSender<Option<String>>, ChannelStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = ChannelStream {
            incoming: rx,
            sent: Vec::new(),
            closed: false,
        };
        (tx, stream)
    }

    /// Counts agent lookups; optionally fails them
    struct CountingStore {
        inner: MemoryStore,
        lookups: AtomicUsize,
        fail_lookups: bool,
    }

    impl CountingStore {
        fn new(fail_lookups: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                lookups: AtomicUsize::new(0),
                fail_lookups,
            }
        }
    }

    #[async_trait]
    impl DocumentStore for CountingStore {
        async fn insert_zone(&self, zone: &Zone) -> crate::store::Result<()> {
            self.inner.insert_zone(zone).await
        }

        async fn push_record(&self, zone: &str, record: &DnsRecord, serial: u64) -> crate::store::Result<UpdateOutcome> {
            self.inner.push_record(zone, record, serial).await
        }

        async fn find_zone(&self, zone: &str) -> crate::store::Result<Option<Zone>> {
            self.inner.find_zone(zone).await
        }

        async fn list_zones(&self) -> crate::store::Result<Vec<Zone>> {
            self.inner.list_zones().await
        }

        async fn insert_eca(&self, eca: &Eca) -> crate::store::Result<()> {
            self.inner.insert_eca(eca).await
        }

        async fn find_eca(&self, id: &EcaId) -> crate::store::Result<Option<Eca>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_lookups {
                return Err(StoreError::Database("connection lost".to_string()));
            }
            self.inner.find_eca(id).await
        }

        async fn set_eca_authorized(&self, id: &EcaId, authorized: bool) -> crate::store::Result<UpdateOutcome> {
            self.inner.set_eca_authorized(id, authorized).await
        }
    }

    fn handler(store: Arc<CountingStore>) -> (Arc<EcaRegistry>, AdmissionHandler) {
        let registry = Arc::new(EcaRegistry::new(store));
        let handler = AdmissionHandler::new(registry.clone(), Duration::from_millis(200));
        (registry, handler)
    }

    async fn register(registry: &EcaRegistry, authorized: bool) -> EcaId {
        let id = registry
            .register(EcaConfig {
                name: "edge-test".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        if authorized {
            registry.set_authorized(&id, true).await.unwrap();
        }
        id
    }

    fn parse(sent: &str) -> AdmissionResponse {
        serde_json::from_str(sent).unwrap()
    }

    /// Run a rejected handshake and return the one message sent
    async fn rejected(handler: &AdmissionHandler, request: &str) -> (Rejection, AdmissionResponse) {
        let (tx, stream) = channel_stream();
        tx.send(Some(request.to_string())).unwrap();

        let (admission, sent) = admit_and_capture(handler, stream).await;
        match admission {
            Some(rejection) => {
                assert_eq!(sent.len(), 1);
                (rejection, parse(&sent[0]))
            }
            None => panic!("expected rejection"),
        }
    }

    /// Wraps `ChannelStream` so sent messages survive the stream being dropped
    struct Capture {
        inner: ChannelStream,
        log: Arc<std::sync::Mutex<(Vec<String>, bool)>>,
    }

    #[async_trait]
    impl HandshakeStream for Capture {
        async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
            self.inner.recv_text().await
        }

        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.log.lock().unwrap().0.push(text.clone());
            self.inner.send_text(text).await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.log.lock().unwrap().1 = true;
            self.inner.close().await
        }
    }

    async fn admit_and_capture(handler: &AdmissionHandler, stream: ChannelStream) -> (Option<Rejection>, Vec<String>) {
        let log = Arc::new(std::sync::Mutex::new((Vec::new(), false)));
        let capture = Capture {
            inner: stream,
            log: log.clone(),
        };
        let admission = handler.admit(capture).await;
        let (sent, closed) = log.lock().unwrap().clone();
        match admission {
            Admission::Rejected(rejection) => {
                assert!(closed, "rejected stream must be closed");
                (Some(rejection), sent)
            }
            _ => (None, sent),
        }
    }

    #[tokio::test]
    async fn test_authorized_agent_admitted() {
        let store = Arc::new(CountingStore::new(false));
        let (registry, handler) = handler(store);
        let id = register(&registry, true).await;

        let (tx, stream) = channel_stream();
        tx.send(Some(format!("{{\"id\":\"{}\"}}", id))).unwrap();

        match handler.admit(stream).await {
            Admission::Authorized { eca, stream } => {
                assert_eq!(eca.id, id);
                assert_eq!(stream.sent.len(), 1);
                assert!(!stream.closed);
                let response = parse(&stream.sent[0]);
                assert!(response.permitted);
                assert_eq!(response.message, "Accepted connection request");
            }
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_agent_rejected() {
        let store = Arc::new(CountingStore::new(false));
        let (registry, handler) = handler(store);
        let id = register(&registry, false).await;

        let (rejection, response) = rejected(&handler, &format!("{{\"id\":\"{}\"}}", id)).await;
        assert_eq!(rejection, Rejection::NotAuthorized);
        assert_eq!(
            response,
            AdmissionResponse {
                permitted: false,
                message: "Not authorized".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_id_skips_lookup() {
        let store = Arc::new(CountingStore::new(false));
        let (_, handler) = handler(store.clone());

        for request in [r#"{"id":"not-a-valid-id"}"#, r#"{"id":42}"#, r#"{"name":"x"}"#] {
            let (rejection, response) = rejected(&handler, request).await;
            assert_eq!(rejection, Rejection::InvalidId);
            assert!(!response.permitted);
            assert_eq!(response.message, "Invalid node ID");
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_rejected() {
        let store = Arc::new(CountingStore::new(false));
        let (_, handler) = handler(store.clone());

        let request = format!("{{\"id\":\"{}\"}}", EcaId::generate());
        let (rejection, response) = rejected(&handler, &request).await;
        assert_eq!(rejection, Rejection::UnknownId);
        assert_eq!(response.message, "Unknown node ID");
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_rejected() {
        let store = Arc::new(CountingStore::new(false));
        let (_, handler) = handler(store);

        for request in ["not json", "[1,2,3]", "\"id\""] {
            let (rejection, response) = rejected(&handler, request).await;
            assert_eq!(rejection, Rejection::Malformed);
            assert_eq!(response.message, "Malformed connection request");
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let store = Arc::new(CountingStore::new(true));
        let (_, handler) = handler(store);

        let request = format!("{{\"id\":\"{}\"}}", EcaId::generate());
        let (rejection, response) = rejected(&handler, &request).await;
        assert_eq!(rejection, Rejection::Internal);
        assert!(!response.permitted);
        assert_eq!(response.message, "Internal error");
    }

    #[tokio::test]
    async fn test_timeout_rejected() {
        let store = Arc::new(CountingStore::new(false));
        let (_, handler) = handler(store);

        // Keep the sender alive so the stream stays silent
        let (_tx, stream) = channel_stream();
        let (rejection, sent) = admit_and_capture(&handler, stream).await;
        assert_eq!(rejection, Some(Rejection::Timeout));
        assert_eq!(sent.len(), 1);
        assert_eq!(parse(&sent[0]).message, "Connection request timed out");
    }

    #[tokio::test]
    async fn test_peer_close_sends_nothing() {
        let store = Arc::new(CountingStore::new(false));
        let (_, handler) = handler(store);

        let (tx, stream) = channel_stream();
        tx.send(None).unwrap();
        let (rejection, sent) = admit_and_capture(&handler, stream).await;
        assert_eq!(rejection, None);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_rejection_states_are_terminal() {
        for rejection in [
            Rejection::Malformed,
            Rejection::InvalidId,
            Rejection::UnknownId,
            Rejection::NotAuthorized,
            Rejection::Timeout,
            Rejection::Internal,
        ] {
            assert!(rejection.state().is_terminal());
        }
        assert!(!HandshakeState::AwaitingRequest.is_terminal());
        assert!(HandshakeState::Disconnected.is_terminal());
    }
}
