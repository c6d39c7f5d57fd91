//! s3tail — live merged tailing of sharded object-store logs
//!
//! Many hosts append newline-delimited JSON log files into an object
//! store, one file per host per rotation, named by creation minute:
//! `YYYY-MM-DD-HH-MM-{host}.log`. This crate turns that collection into a
//! single near-real-time stream of records in approximate timestamp
//! order, like `tail -f` over the whole fleet.
//!
//! ```text
//! ObjectStore → search → FilePoller → MergeStream → consumer
//! ```
//!
//! - [`search`](search::search) walks the `-`-delimited date hierarchy
//!   with bounded fan-out to locate matching files without enumerating
//!   the store.
//! - [`FilePoller`](discovery::FilePoller) re-runs the search on a fixed
//!   interval, tracking rotation per host.
//! - [`MergeStream`](merge::MergeStream) tails every active file with
//!   idempotent re-read/skip semantics and emits records once they age
//!   out of a bounded delay window.

pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod key;
pub mod merge;
pub mod record;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod search;
pub mod store;

pub use clock::{ManualClock, TailClock, WallClock};
pub use config::{DiscoveryErrorPolicy, StoreConfig, TailConfig};
pub use discovery::{DiscoveryEvent, FilePoller, PollerHandle};
pub use error::TailError;
pub use key::{format_minute, LogFileKey, FAR_FUTURE};
pub use merge::{MergeStream, TailEvent, TailHandle};
pub use record::Record;
pub use search::search;
pub use store::{InMemoryObjectStore, ListResult, ObjectStore};
#[cfg(feature = "s3")]
pub use config::S3Config;
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
