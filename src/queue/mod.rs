pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod sweeper;
pub mod worker;
