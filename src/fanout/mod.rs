pub mod bus;
pub mod topic;

pub use bus::{SubscriptionGuard, SubscriptionHandle, UpdateBus};
pub use topic::{Topic, Update};
