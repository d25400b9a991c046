pub mod process;
pub mod stats;

pub use process::{EntryConfig, EntrySnapshot};
pub use stats::ResourceReading;
