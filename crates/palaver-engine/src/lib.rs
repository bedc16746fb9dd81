//! # palaver-engine
//!
//! The orchestration core: dedup ledger, conversation registry, per-session
//! message logs, the message router, and the history sync protocol, all
//! owned by an explicit [`ClientContext`] rather than any global state.
//!
//! The router is the layer UI code calls into; its only upward contract is
//! the [`ViewSink`] callback pair. Everything here is designed so that two
//! windows applying the same server message concurrently converge on one
//! stored copy: merges are id-keyed and idempotent, never destructive.

pub mod context;
pub mod history;
pub mod ledger;
pub mod registry;
pub mod router;
pub mod session;
pub mod sink;

pub use context::{ClientContext, EnvelopeOutcome, LOCAL_CACHE_LIMIT};
pub use history::HistorySync;
pub use ledger::{BoundedIdSet, DedupLedger};
pub use registry::ConversationRegistry;
pub use router::RouteOutcome;
pub use session::{SessionBook, SessionLog};
pub use sink::{NullSink, ViewSink};
