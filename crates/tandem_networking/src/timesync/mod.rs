//! # Time Sync
//!
//! Uniform game-time advancement and desync detection.
//!
//! - [`room`]: per-room buffering and slice broadcast
//! - [`hash`]: hash report collection and verification
//! - [`routine`]: the cooperative scheduler that paces slices
//! - [`clock`]: the client-side clock gated by `AdvanceTime`

pub mod clock;
pub mod hash;
pub mod room;
pub mod routine;

pub use clock::{ClientGameClock, TimedCall};
pub use hash::{HashEntry, HashVerifier, TimeHashPair};
pub use room::{SliceReport, TimeSyncRoutine, TimeSyncedServerRoom, HASH_WINDOW_SLICES};
pub use routine::{Routine, RoutineScheduler, RoutineStep};
