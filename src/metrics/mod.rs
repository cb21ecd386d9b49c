//! Observability plumbing.
//!
//! - `events`: typed internal events and the `InternalEvent` trait
//! - `server`: recorder installation plus the Prometheus scrape endpoint

pub mod events;
pub mod server;

pub use server::init;

/// Record an internal event against the installed metrics recorder.
///
/// Routes through [`InternalEvent::emit`](events::InternalEvent::emit), so
/// call sites stay one line and the metric names live next to the event
/// definitions.
///
/// # Example
///
/// ```ignore
/// emit!(RecordsEnriched { count: 1 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
