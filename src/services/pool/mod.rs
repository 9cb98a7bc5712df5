mod worker_pool;

pub use worker_pool::{PoolConfig, PoolError, WorkerPool};
