//! Student-management server.
//!
//! Accepts TCP connections and serves each one on its own task:
//!
//! ```text
//! Server ──accept──▶ SessionHandler ──▶ Dispatcher ──▶ collaborators
//!    │                     │  (identity via watch)
//!    └──── SessionRegistry ◀┘  stats · listing · broadcast · close_all
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sms::server::{Server, ServerConfig};
//! use sms::services::Services;
//!
//! let config = ServerConfig::default().with_port(8888);
//! let server = Server::start_with(config, Services::in_memory()).await?;
//! server.stopped().await;
//! ```

mod actions;
mod config;
mod dispatch;
mod handler;
mod listener;
mod registry;

pub use config::ServerConfig;
pub use dispatch::{ActionHandler, Dispatcher, Outcome, RequestContext, SessionChange};
pub use handler::SessionHandler;
pub use listener::Server;
pub use registry::{ClientInfo, RoleCounts, ServerStats, SessionEntry, SessionRegistry};
