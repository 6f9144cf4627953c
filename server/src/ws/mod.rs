//! WebSocket side of the hub: upgrade entry point, per-connection loops and
//! the chat envelope codec.

pub mod actor;
pub mod handler;
pub mod protocol;
