pub mod active;
pub mod cancel;
pub mod config;
pub mod delivery;
pub mod download;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod routes_jobs;
pub mod state;
pub mod telegram;
pub mod text;
pub mod types_jobs;
pub mod worker_loop;
