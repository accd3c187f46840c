mod common;
mod delivery_tests;
mod event_tests;
mod metrics_tests;
mod retry_tests;
