//! 核心层：停止信号、对话状态、错误、过程事件、关闭处理与运行时构建

pub mod builder;
pub mod error;
pub mod events;
pub mod shutdown;
pub mod state;
pub mod stop;

pub use builder::AgentBuilder;
pub use error::AgentError;
pub use events::{AgentEvent, EventSender};
pub use shutdown::{Interrupt, ShutdownManager, ShutdownReason};
pub use state::ConversationState;
pub use stop::{run_guarded, Guarded, StopSignal};
