//! KESTREL Window - Pagination over a conversation's message history
//!
//! Drives initial and older-page loads against a [`PageSource`] and keeps
//! the virtualization anchor (`first_item_index`) consistent with the store.

pub mod source;
pub mod window;

pub use source::*;
pub use window::*;
