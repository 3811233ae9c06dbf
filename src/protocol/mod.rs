//! Session protocol messages and wire contract.
//!
//! # Message Flow
//!
//! ```text
//! Client                                 Server
//!    |                                     |
//!    |---- REQUEST  LOGIN {user, pass} --->|  only action allowed anonymously
//!    |<--- RESPONSE LOGIN {user} ----------|  success=true, identity attached
//!    |                                     |
//!    |---- REQUEST  GET_ALL_COURSES ------>|  dispatched by action
//!    |<--- RESPONSE GET_ALL_COURSES -------|  same action, same correlationId
//!    |                                     |
//!    |<--- NOTIFICATION BROADCAST ---------|  unsolicited, routed to the sink
//! ```
//!
//! # Framing
//!
//! Each message travels as one frame: a 4-byte big-endian length prefix
//! followed by the JSON body. One `send` produces exactly one `receive` on
//! the peer, and frames arrive in send order.
//!
//! # Correlation
//!
//! Clients attach a generated `correlationId` to every awaited request and
//! the server echoes it on the response. Responses without an id fall back to
//! matching by action.

mod contract;
mod message;

pub use contract::{actions, keys, text};
pub use message::{Message, MessageKind};

/// Default TCP port for the session protocol
pub const DEFAULT_PORT: u16 = 8888;

/// Default upper bound on a single frame body (8 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
