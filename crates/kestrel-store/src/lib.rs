//! KESTREL Store - Ordered message log for one conversation
//!
//! - Stable logical indices across prepend and append
//! - Optimistic reconciliation of locally sent messages
//! - Live updates with a render-identity version counter

pub mod reconcile;
pub mod store;
pub mod update;

pub use reconcile::*;
pub use store::*;
pub use update::*;
