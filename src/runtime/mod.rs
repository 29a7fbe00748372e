//! Runtime adapters used to launch tasks and timers.

pub mod tokio_spawner;

pub use tokio_spawner::TokioSpawner;
