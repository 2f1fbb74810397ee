// Local runtime: runs tasks directly on this host, with directories
// standing in for containers and volumes.

mod container;
mod fs;
mod volume;
mod worker;

pub use container::LocalContainer;
pub use volume::{LocalVolume, TaskCacheStore};
pub use worker::{host_platform, LocalPool, LocalWorker};
