pub mod capabilities;
pub mod controller;
pub mod signing;
pub mod webdriver;

pub use capabilities::{CapabilityProfile, CapabilitySet};
pub use controller::{Session, SessionController};
pub use signing::SigningIdentity;
pub use webdriver::{DriverConnection, DriverConnector, HttpDriverConnector, LogEntry};
