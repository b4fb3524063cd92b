//! Stage Registry and Stage Pipeline.
//!
//! The registry is the ordered catalogue of stages with their enablement
//! rules and declared data dependencies; the runner walks it.

pub mod registry;
pub mod runner;

pub use registry::{
    Enablement, ExecScope, RegistryError, StageDescriptor, StageFn, StageId, StageRegistry,
};
pub use runner::{Pipeline, PipelineReport, StageContext, StageOutcome, StageRecord, StageStatus};
