pub mod artifact;
pub mod event_log;
pub mod persistence;
pub mod poller;
pub mod process_handle;
pub mod registry;
pub mod resource_probe;
pub mod signal;

pub use event_log::EventLog;
pub use poller::Poller;
pub use registry::Supervisor;
