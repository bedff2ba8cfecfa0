//! 核心编排层：错误、轮次状态与状态机、编排器、构建器、会话监管、任务调度

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::{build_capability_registry, create_agent_builder, AgentBuilder, CapabilityFactory};
pub use error::{AgentError, CapabilityError, PersistenceError};
pub use orchestrator::{create_llm_from_config, Orchestrator, OrchestratorSettings};
pub use session_supervisor::{ActiveSession, SessionSupervisor};
pub use state::{Step, Transition, TurnState};
pub use task_scheduler::TaskScheduler;
