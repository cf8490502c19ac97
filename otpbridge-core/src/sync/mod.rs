//! Companion-device sync
//!
//! Keeps the credential sets of two devices converging:
//! - Full snapshots keyed by canonical credential URI
//! - Remote-wins merge, no deletion propagation
//! - Transport behind the [`PeerChannel`] trait, with sends dropped until activation

pub mod channel;
pub mod reconciler;
pub mod snapshot;

pub use channel::{MemoryChannel, PeerChannel, PeerMessage};
pub use reconciler::{MergeReport, SyncReconciler};
pub use snapshot::{DecodedSnapshot, Snapshot, CONTEXT_KEY};
