//! Latency capture
//!
//! Two mutually exclusive ways of timing a trial's exchange:
//! [`InPageInterceptor`] instruments the page's own fetch, while
//! [`OutOfPageObserver`] correlates the browser's network lifecycle events.

mod context;
pub(crate) mod events;
mod fetch;
mod filter;
mod frame;
mod interceptor;
mod observer;

pub use context::{sample_name, TrialContext, ERROR};
pub use events::{NetworkSubscription, RawFeeds};
pub use fetch::{
    ChunkStream, Fetch, FetchError, FetchRequest, FetchResponse, Headers, ResponseBody,
};
pub use frame::{FrameClock, IntervalFrameClock};
pub use interceptor::InPageInterceptor;
pub use observer::{ObservationOutcome, ObserverConfig, OutOfPageObserver};
