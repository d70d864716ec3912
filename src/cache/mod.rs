//! Persistent analysis cache keyed by content hash
//!
//! The same bytes always map to the same entry, wherever the file lives.
//! Entries that finished every stage are served as hits; partial entries let
//! an interrupted or budget-limited asset resume where it stopped.
//!
//! # Entry States
//!
//! | State | Served as | Description |
//! |-------|-----------|-------------|
//! | Missing | miss | Never assessed, or removed by gc |
//! | Partial | resume | Scored results reused, remaining stages run |
//! | Complete | hit | Final verdict, no stage runs |
//! | Corrupt / newer schema | miss | Logged and ignored |

mod atomic;
pub mod entry;
pub mod hash;
pub mod store;

pub(crate) use atomic::write_atomic;
pub use entry::{migrate_v1_to_v2, CacheEntry, SCHEMA_VERSION};
pub use hash::{hash_file, is_valid_hash};
pub use store::{CacheLookup, CacheStats, ContentCache, GcReport};
