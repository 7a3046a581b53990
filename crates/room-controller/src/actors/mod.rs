//! Actor-based core: one actor per room (track registry) and one per
//! participant (SFU session lifecycle), plus the directories that spawn and
//! address them.

pub mod directory;
pub mod messages;
pub mod room;
pub mod session;

pub use directory::{RoomDirectory, SessionDirectory};
pub use messages::{Track, TrackListing, TrackLocation};
pub use room::{RoomActor, RoomActorHandle};
pub use session::{PeerSessionActor, PeerSessionHandle};
