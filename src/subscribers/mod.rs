//! # Event subscribers.
//!
//! ```text
//! component ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                        ├──► LogWriter (tracing)
//!                                                        └──► custom Subscribe impls
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
