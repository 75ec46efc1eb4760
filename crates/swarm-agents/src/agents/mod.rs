//! Concrete agents backing the EPCC pipeline: planner/architect, coder,
//! reviewer, security auditor, and web researcher. Each implements one or
//! more of `coordination::agents`'s `Think`/`Vote`/`Execute` capability
//! traits over a shared `Arc<dyn CompletionClient>`, per spec §9's
//! capability-set design note — no agent implements all three.

pub mod architect;
pub mod coder;
pub mod reviewer;
pub mod security_auditor;
pub mod web_researcher;

pub use architect::Architect;
pub use coder::Coder;
pub use reviewer::Reviewer;
pub use security_auditor::SecurityAuditor;
pub use web_researcher::WebResearcher;
