// src/lib.rs
pub mod buffer;
pub mod connection;
pub mod error;
pub mod http;
pub mod io;
pub mod reactor;
pub mod router;
pub mod server;
pub mod signal;
pub mod syscalls;
pub mod timer;
pub mod worker;

// Re-exports for users
pub use buffer::ByteBuffer;
pub use connection::HttpConnection;
pub use error::{Error, Result};
pub use http::{Message, MessageKind, Method, ParseStatus};
pub use reactor::Reactor;
pub use router::{Handler, Router};
pub use server::Server;
