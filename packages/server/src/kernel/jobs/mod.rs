//! Job queue substrate: the job model and queue store implementations.

mod job;
mod memory_store;
mod redis_store;
mod store;

pub use job::{Job, JobError, JobStatus};
pub use memory_store::MemoryQueueStore;
pub use redis_store::RedisQueueStore;
pub use store::{
    keys, QueueError, QueueResult, QueueStore, GLOBAL_SPACING_TTL, PLATFORM_STATE_TTL,
    RUNNING_LEASE_TTL,
};
