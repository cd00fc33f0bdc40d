//! Hive - Rust 多智能体轮次编排引擎
//!
//! 模块划分：
//! - **agent**: 无头运行时（run_turn / run_multi_task_plan / handle_input）
//! - **bus**: 消息信封、优先级路由器与 worker 池
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 停止信号、对话状态、错误、事件、关闭处理与构建器
//! - **llm**: LLM 客户端抽象与测试替身
//! - **memory**: 对话消息
//! - **observability**: 日志初始化
//! - **tools**: 工具注册表、过滤与执行器
//! - **turn**: 单轮路由状态机与各执行步骤
//! - **workflow**: 多任务规划与波次调度

pub mod agent;
pub mod bus;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod turn;
pub mod workflow;

pub use agent::{AgentRuntime, InputOutcome, InputPath};
pub use core::{AgentBuilder, StopSignal};
