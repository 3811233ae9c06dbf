//! # SMS Protocol - Student Management Client/Server Sessions
//!
//! Session layer and request correlation for the student-management system:
//! a long-lived TCP connection per client, framed JSON messages, a server
//! that dispatches each request to a role-checked handler, and a client that
//! matches responses to the requests waiting for them.
//!
//! ## Features
//!
//! - **Framed JSON messages**: 4-byte length prefix, REQUEST/RESPONSE/NOTIFICATION
//! - **Request correlation**: per-request `correlationId`, concurrent waiters
//! - **Login-gated dispatch**: action table, role permissions, panic isolation
//! - **Reconnect**: explicit state machine with pluggable backoff
//! - **Operator surface**: statistics, client listing, broadcast, console
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//! Client                              Server
//!    |                                   |
//!    |--- REQUEST LOGIN (cid=a) -------->|  Dispatcher -> AuthService
//!    |<-- RESPONSE LOGIN (cid=a) --------|  identity bound to session
//!    |                                   |
//!    |--- REQUEST GET_ALL_COURSES (b) -->|  CourseCatalog
//!    |--- REQUEST GET_STUDENT_INFO (c) ->|  (handled in order)
//!    |<-- RESPONSE GET_ALL_COURSES (b) --|
//!    |<-- RESPONSE GET_STUDENT_INFO (c) -|
//!    |                                   |
//!    |<-- NOTIFICATION BROADCAST --------|  operator broadcast
//! ```
//!
//! ### Client State Machine
//!
//! ```text
//!                  connect()
//!  [Disconnected] ───────────> [Connected]
//!        ^                         │
//!        │ attempts exhausted      │ connection lost
//!        │                         v
//!        └──────────────── [Reconnecting] ──reopen──> [Connected]
//! ```
//!
//! `disconnect()` from any state returns to `Disconnected` without reconnecting.
//!
//! ### Message Types
//!
//! | Type         | Direction      | Purpose                              |
//! |--------------|----------------|--------------------------------------|
//! | REQUEST      | Client→Server  | Invoke an action                     |
//! | RESPONSE     | Server→Client  | Result of exactly one request        |
//! | NOTIFICATION | Server→Client  | Unsolicited event (broadcast)        |
//!
//! ## Quick Start
//!
//! ### Server
//!
//! ```rust,ignore
//! use sms::{Server, ServerConfig, Services};
//!
//! let server = Server::start_with(ServerConfig::default(), Services::in_memory()).await?;
//! println!("{}", server.stats());
//! server.stop().await;
//! ```
//!
//! ### Client
//!
//! ```rust,ignore
//! use sms::ClientSession;
//!
//! let session = ClientSession::new();
//! if session.connect("localhost", 8888).await {
//!     let reply = session.login("admin", "admin123").await;
//!     assert!(reply.success);
//!     let courses = session.get_all_courses().await;
//!     println!("{}", courses.to_json()?);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Message model and wire contract
//! - [`transport`]: Framed TCP connection
//! - [`client`]: Client session, correlation, reconnect
//! - [`server`]: Listener, per-connection handler, dispatch, registry
//! - [`services`]: Collaborator traits and the in-memory store
//! - [`console`]: Operator console
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod protocol;
pub mod server;
pub mod services;
pub mod transport;

// Re-exports for convenience
pub use client::{BackoffPolicy, ClientConfig, ClientSession, NotificationSink, SessionState};
pub use config::Config;
pub use console::{Console, ConsoleCommand};
pub use error::{Result, SmsError};
pub use protocol::{Message, MessageKind};
pub use server::{Dispatcher, Server, ServerConfig, ServerStats, SessionHandler};
pub use services::{Identity, InMemoryStore, Role, Services};
pub use transport::{Transport, TransportConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
