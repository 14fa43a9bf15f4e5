pub mod autonomous;
pub mod error;
pub mod executor;
pub mod improvement;
pub mod monitor;
pub mod orchestrator;
pub mod pathway_adapter;
pub mod recovery;

pub use autonomous::AutonomousLoop;
pub use error::AgentsError;
pub use executor::ToolExecutor;
pub use improvement::{ImprovementEngine, ImprovementReport, TestReport, TestingStrategy};
pub use monitor::DeploymentMonitor;
pub use orchestrator::Orchestrator;
pub use pathway_adapter::PathwayCacheInvalidator;
pub use recovery::{ErrorRecovery, RecoveryOutcome};
