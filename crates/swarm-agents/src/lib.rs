//! Orchestrator and concrete agent roster driving one task through the
//! EPCC pipeline on top of the `coordination` deliberation core.

pub mod agents;
pub mod config;
pub mod council_state;
pub mod orchestrator;
pub mod state_machine;

pub use config::SwarmConfig;
pub use council_state::{CouncilState, Plan, ReviewComment, SubtaskRecord, SubtaskStatus, TestResult};
pub use orchestrator::{Orchestrator, OrchestratorError, ShellTestRunner};
pub use state_machine::{BudgetConfig, CouncilStatus, StateMachine};
