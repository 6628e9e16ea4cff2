//! KESTREL Time - Clocks and timers for the synchronization state machines
//!
//! Nothing in this crate sleeps. State machines ask a [`Clock`] for the
//! current time and keep their deadlines in [`TimerSlot`]s; the async
//! runtime decides when to wake up and poll them.

pub mod clock;
pub mod timer;
pub mod backoff;
pub mod debounce;

pub use clock::*;
pub use timer::*;
pub use backoff::*;
pub use debounce::*;
