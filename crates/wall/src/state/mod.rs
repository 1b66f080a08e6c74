mod buffer;
mod client;
mod interpolate;
mod schema;
mod store;

pub use buffer::{DEFAULT_CAPACITY, SharedState, Snapshot, SnapshotBuffer};
pub use client::{ModuleStates, StateManager};
pub use interpolate::{Interpolate, Interpolator, lerp};
pub use schema::Schema;
pub use store::{FlushStats, ModuleState, StateStore};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("unknown interpolator {0:?}")]
    UnknownInterpolator(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("state {0:?} is already defined")]
    AlreadyDefined(String),
}
