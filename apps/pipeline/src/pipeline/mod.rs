//! Stage orchestration: retry policy, the generic stage runner, the
//! coordinator that drives all stages for one run, and run reports.

pub mod coordinator;
pub mod report;
pub mod retry;
pub mod runner;

pub use coordinator::PipelineCoordinator;
pub use report::RunReport;
pub use retry::RetryPolicy;
pub use runner::RunnerSettings;
