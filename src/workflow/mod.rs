//! 多任务调度：规划、依赖图、波次执行与汇总

pub mod builder;
pub mod engine;
pub mod graph;
pub mod planner;
pub mod types;
pub mod worker;

pub use builder::PlanBuilder;
pub use engine::MultiTaskOrchestrator;
pub use planner::{parse_plan, PlanDocument};
pub use types::{
    AgentTask, PlanError, PlanOutcome, PlanReport, TaskError, TaskId, TaskResult, TaskStatus, UnknownRole, WorkerRole,
};
pub use worker::{LlmWorker, WorkerDispatch};
