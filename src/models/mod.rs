pub mod event;
pub mod health;
pub mod job;
pub mod metrics;
pub mod retry;
