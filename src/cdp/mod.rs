//! Chrome DevTools Protocol plumbing

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use transport::{launch_chrome, CdpMessage, Transport};
