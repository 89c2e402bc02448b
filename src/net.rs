//! Network primitives for the socket-backed transport.

pub mod endpoint;
pub mod socket;

pub use endpoint::Endpoint;
pub use socket::UdpSocket;
