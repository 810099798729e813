pub mod common;
pub mod completions;
pub mod conflicts;
pub mod discard;
pub mod enqueue;
pub mod list;
pub mod log;
pub mod retry;
pub mod status;
