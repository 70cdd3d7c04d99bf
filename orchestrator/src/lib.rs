pub mod aggregate;
pub mod client;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod net;
pub mod scheduler;
pub mod state;
pub mod timing;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::WorkerClient;
pub use config::RunConfig;
pub use directory::Directory;
pub use dispatch::Dispatcher;
pub use error::OrchestratorError;
pub use history::History;
pub use scheduler::Scheduler;
pub use state::GlobalState;
