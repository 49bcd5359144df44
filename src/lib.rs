pub mod addrdec;
pub mod channel;
pub mod config;
pub mod controller;
pub mod deadlock;
pub mod queue;
pub mod request;
pub mod stats;
pub mod upstream;

/// Physical byte address as seen by the controller.
#[allow(non_camel_case_types)]
pub type address = u64;

pub use addrdec::AddressDecoder;
pub use channel::DramChannel;
pub use config::Config;
pub use controller::MemoryController;
