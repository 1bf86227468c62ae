//! Messaging-network connector: per-session connection lifecycles, the QR
//! credential-handshake flow, and outbound text delivery.
//!
//! The [`manager::SessionManager`] owns one connection state machine per named
//! session. The underlying transport is abstracted behind the
//! [`connector::Connector`] trait; production uses the HTTP
//! [`gateway::GatewayConnector`], tests inject an in-memory fake.

pub mod backoff;
pub mod connector;
pub mod gateway;
pub mod manager;
pub mod repo;
