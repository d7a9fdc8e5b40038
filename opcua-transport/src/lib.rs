//! Transport layer for the OPC-UA client stack
//!
//! A transport opens a full-duplex byte stream to a server. The secure
//! channel layer runs the UA-TCP protocol on top of it.

pub mod memory;
pub mod stream;
pub mod tcp;
pub mod url;

pub use memory::{MemoryListener, MemoryTransport};
pub use stream::{ByteStream, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
pub use url::EndpointUrl;
