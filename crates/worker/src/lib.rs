pub mod limits;
pub mod observer;
pub mod pool;

pub use limits::{AdmissionGuard, ConcurrencyLimits};
pub use observer::CrawlPageObserver;
pub use pool::{WorkerContext, WorkerPool};
