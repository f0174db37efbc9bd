mod cli;
mod config;
mod context;
mod definition;
mod executor;
mod init;
mod monitor;
mod progress;
mod ramp;
mod run;
mod scheduler;
mod shutdown;
mod types;
mod vu;

pub mod prelude {
    pub use crate::cli::{GaleScenarioCli, ReporterOpt};
    pub use crate::config::{ExecutorConfig, RunDescriptor, ScenarioConfig, Stage, ThresholdExprs};
    pub use crate::context::{PollPolicy, RunnerContext, UserValuesConstraint, VuContext};
    pub use crate::definition::{EntryFn, HookResult, ScenarioDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::ramp::ramping_target;
    pub use crate::run::{run, RunOutcome, THRESHOLDS_FAILED_EXIT_CODE};
    pub use crate::types::GaleResult;

    pub use futures::future::BoxFuture;
    pub use futures::FutureExt;
    pub use gale_core::prelude::*;
    pub use gale_instruments::{Assertion, Reporter, SampleTags};
    pub use gale_summary_model::{CheckSummary, RunSummary};
}
