//! 单轮编排：意图分类、路由状态机、模型调用 / 工具执行 / 检索 / 批量导入步骤与主循环

pub mod batch;
pub mod intent;
pub mod loop_;
pub mod model_step;
pub mod parse;
pub mod retrieval;
pub mod router;
pub mod tool_step;

pub use batch::BatchStep;
pub use intent::{Intent, IntentClassifier, KeywordClassifier};
pub use loop_::{TurnEngine, DEFAULT_MAX_STEPS};
pub use model_step::{ModelStep, ModelStepOutcome};
pub use retrieval::RetrievalStep;
pub use router::{Transition, TurnRouter};
pub use tool_step::{execute_calls, ToolBatch, ToolStep};
