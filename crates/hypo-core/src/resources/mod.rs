pub mod device_pool;
pub mod exclusive;
pub mod registry;

pub use device_pool::{DeviceLease, DevicePool};
pub use exclusive::{ExclusiveResource, ResourceLease};
pub use registry::ResourceRegistry;
