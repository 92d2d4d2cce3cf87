pub mod lifecycle;
pub mod resources;

pub use lifecycle::{DeviceClass, DeviceHandle, DeviceLifecycleManager};
pub use resources::EmulatorResources;
