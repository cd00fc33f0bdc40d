//! LLM 层：客户端抽象与测试替身（Mock / Scripted / Fn）

pub mod mock;
pub mod traits;

pub use mock::{FnLlmClient, MockLlmClient, RecordedCall, ScriptStep, ScriptedLlmClient};
pub use traits::{LlmClient, LlmError, ModelReply};
