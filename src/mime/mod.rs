//! MIME handling for relayed messages: parse once, emit per recipient.
//!
//! The part tree keeps every byte it does not need to touch, so a copy
//! without a footer reproduces the original body (with CRLF line endings).

pub mod encoding;
pub mod footer;
pub mod header;
pub mod message;
pub mod node;

pub use footer::Footer;
pub use message::Message;
pub use node::Node;
