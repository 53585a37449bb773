//! View models. Each owns its bus subscriptions for exactly as long as it is
//! mounted and re-queries its collaborator when a subscribed topic fires.

pub mod attendance;
#[cfg(feature = "desktop")]
pub mod bridge;
pub mod directory;
pub mod refetch;

pub use attendance::AttendanceFeed;
#[cfg(feature = "desktop")]
pub use bridge::WebviewBridge;
pub use directory::{DirectoryListing, DirectoryView};
pub use refetch::RefetchView;
