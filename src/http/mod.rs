// src/http/mod.rs
pub mod message;

pub use message::{Message, MessageKind, Method, ParseStatus};
