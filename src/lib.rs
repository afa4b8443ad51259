// Library interface for the Packetframe control plane
// Allows testing and reuse of the zone and admission logic

pub mod api;
pub mod config;
pub mod dns;
pub mod eca;
pub mod store;
