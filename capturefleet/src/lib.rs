pub mod config;
pub mod coordinator;
pub mod error;
pub mod object_store;
pub mod queue;
pub mod record_store;
pub mod renderer;
pub mod telemetry;
pub mod types;
pub mod worker;
