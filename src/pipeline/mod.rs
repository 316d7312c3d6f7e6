mod error;
mod pipeline;
mod state_machine;
mod types;

pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use pipeline::{InstallOutcome, InstallationPipeline, STAGING_DIR};
pub use state_machine::InstallStateMachine;
pub use types::{
    BootstrapSource, InstallRequest, PipelineConfig, PipelineEvent, PipelineStage, PipelineState,
    PipelineTransition, ProgressRange,
};
