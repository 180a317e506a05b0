//! These models represent the objects passed between the caller, the conversation
//! and the Messages API.
//!
//! The same types are used on the wire and on disk: a [`message::Message`] is what the
//! API returns, what the conversation stores, and (reduced to role and content) what
//! a request sends back. Content blocks carry their own validation so malformed
//! turns are rejected before any network call.
pub mod catalog;
pub mod content;
pub mod conversation;
pub mod message;
pub mod role;
pub mod tool;
pub mod usage;
