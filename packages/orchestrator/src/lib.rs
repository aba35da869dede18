// Hostel booking automation - job orchestration core
//
// Jobs are persisted rows driven through a small status machine by a drain
// loop. Concrete job logic lives in domains/ and is looked up by kind.

pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
