//! Duplex relay between one client connection and the engine.
//!
//! A session runs two pumps on their own threads:
//!
//! ```text
//!   client socket --[ClientToEngine]--> engine input
//!   client socket <--[EngineToClient]-- engine output
//! ```
//!
//! Line order is preserved within a direction; the two directions are
//! independent. When either pump stops it cancels the other, and the
//! session returns only once both have been joined.

pub mod pump;
pub mod session;

pub use session::Session;
