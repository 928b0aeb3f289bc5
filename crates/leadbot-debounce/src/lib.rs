//! `leadbot-debounce`: coalesces message fragments per conversation key.
//!
//! # Overview
//!
//! Users often split one thought across several chat messages. The
//! [`DebounceCoordinator`] buffers fragments per key and restarts a timer on
//! every arrival. When the timer survives a full window, the buffer is
//! drained, joined with the configured separator and handed to the caller
//! that supplied the last fragment. Callers displaced by a newer fragment
//! resolve early as [`DebounceOutcome::Superseded`].
//!
//! # Buffers
//!
//! | Backend           | Storage                                         |
//! |-------------------|-------------------------------------------------|
//! | `MemoryBuffer`    | In-process map                                  |
//! | `CacheListBuffer` | List on the shared key-value cache              |

pub mod buffer;
pub mod coordinator;
pub mod error;
pub mod timer;

pub use buffer::{CacheListBuffer, FragmentBuffer, MemoryBuffer};
pub use coordinator::{DebounceCoordinator, DebounceOutcome};
pub use error::{DebounceError, Result};
pub use timer::{Timer, TokioTimer};
