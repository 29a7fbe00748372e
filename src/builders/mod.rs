pub mod orchestrator_builder;

pub use orchestrator_builder::{build_orchestrator, OrchestratorBuilder};
