//! Edge Compute Agent admission
//!
//! ## Architecture
//!
//! ```text
//! ECA → POST /ecas/new → Registry (unauthorized identity)
//! Operator → POST /ecas/{id}/authorize → Registry (flag flipped)
//! ECA → GET /ws (WebSocket) → Admission Handler → Registry lookup
//!                                   ↓
//!                 exactly one {"permitted", "message"} reply
//! ```
//!
//! ## Components
//!
//! - `identity`: agent ids, registration metadata and the agent document
//! - `registry`: registration, lookup and the authorization flag
//! - `admission`: the per-connection handshake state machine
//! - `transport`: the message stream the handshake runs over (WebSocket)

pub mod admission;
pub mod identity;
pub mod registry;
pub mod transport;

pub use admission::*;
pub use identity::*;
pub use registry::*;
pub use transport::*;
