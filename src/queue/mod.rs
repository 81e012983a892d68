mod broker;

pub use broker::{Job, JobQueue, QueueError};
