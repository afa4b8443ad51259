//! Zone Management
//!
//! Validation and storage for DNS zones submitted by operators.
//!
//! ## Architecture
//!
//! ```text
//! Operator → HTTP API → Record Validator → Zone Store → DocumentStore
//!                                              ↓
//!                                  append + serial bump (one atomic update)
//! ```
//!
//! ## Components
//!
//! - `dns_types`: record type definitions (A, AAAA, CNAME, MX, TXT, NS) and errors
//! - `validation`: zone name and record payload validation
//! - `zone_store`: zone creation and record appends against the document store

pub mod dns_types;
pub mod validation;
pub mod zone_store;

pub use dns_types::*;
pub use validation::*;
pub use zone_store::*;
