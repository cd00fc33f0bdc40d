//! 消息层：对话消息与工具调用的数据模型

pub mod conversation;

pub use conversation::{Message, Role, ToolCall};
