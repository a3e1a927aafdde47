//! Network Module
//!
//! TCP transport between agents and the depot.
//!
//! ## Architecture
//! - Single acceptor thread, one reader and one writer thread per connection
//! - A runner thread owns the depot; connections talk to it over channels
//! - `TcpLink` is the agent's end of a connection

mod client;
mod connection;
mod server;

pub use client::TcpLink;
pub use connection::Connection;
pub use server::{Server, ServerEvent, ShutdownHandle};
