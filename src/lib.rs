#![forbid(unsafe_code)]

pub mod acquire;
pub mod audio;
pub mod backend;
pub mod cache;
pub mod cli;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod telemetry;

pub use error::{TsError, TsResult};
pub use model::{BackendKind, RunOutcome, RunRequest, TranscriptionResult};
pub use orchestrator::{CancellationToken, Pipeline};
