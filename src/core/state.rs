//! 轮次状态：ConversationState
//!
//! 由轮次循环独占；只允许追加消息或翻转标记，从不回滚。

use std::sync::Arc;

use serde::Serialize;

use crate::memory::{Message, Role};
use crate::tools::ToolRegistry;

/// 一次对话的运行状态
#[derive(Clone, Serialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// 本轮已因取消或超时停止
    pub stopped: bool,
    /// 本轮批量副作用（如批量导入）是否已执行
    pub side_effect_completed: bool,
    #[serde(skip)]
    tools: Arc<ToolRegistry>,
}

impl std::fmt::Debug for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationState")
            .field("messages", &self.messages)
            .field("stopped", &self.stopped)
            .field("side_effect_completed", &self.side_effect_completed)
            .field("tools", &self.tools.tool_names())
            .finish()
    }
}

impl ConversationState {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            messages: Vec::new(),
            stopped: false,
            side_effect_completed: false,
            tools,
        }
    }

    /// 以已有历史创建（如从上一轮延续）
    pub fn with_history(tools: Arc<ToolRegistry>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::new(tools)
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// 最近一条 user 消息的下标（即当前轮次起点）
    pub fn current_turn_start(&self) -> Option<usize> {
        self.messages.iter().rposition(Message::is_user)
    }

    /// 最近一条 user 消息
    pub fn last_user_text(&self) -> Option<&str> {
        self.current_turn_start().map(|i| self.messages[i].text())
    }

    /// 当前轮次（最近 user 消息之后）的消息
    pub fn current_turn(&self) -> &[Message] {
        match self.current_turn_start() {
            Some(i) => &self.messages[i + 1..],
            None => &self.messages,
        }
    }

    /// 开始新的一轮：追加 user 消息并重置本轮标记
    pub fn begin_turn(&mut self, user_text: &str) {
        self.stopped = false;
        self.side_effect_completed = false;
        self.messages.push(Message::user(user_text));
    }

    /// 保留最近 max 条消息；若首条为 system 则始终保留。由调用方在轮次之间调用。
    pub fn trim_to(&mut self, max: usize) {
        if self.messages.len() <= max {
            return;
        }
        let keep_system = matches!(self.messages.first().map(Message::role), Some(Role::System));
        if keep_system && max > 0 {
            let system = self.messages.remove(0);
            let excess = self.messages.len().saturating_sub(max - 1);
            self.messages.drain(..excess);
            self.messages.insert(0, system);
        } else {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConversationState {
        ConversationState::new(Arc::new(ToolRegistry::new()))
    }

    #[test]
    fn test_current_turn_slices_after_last_user() {
        let mut s = state();
        s.begin_turn("first");
        s.push(Message::assistant("a1"));
        s.begin_turn("second");
        s.push(Message::assistant("a2"));
        assert_eq!(s.last_user_text(), Some("second"));
        assert_eq!(s.current_turn().len(), 1);
        assert_eq!(s.current_turn()[0].text(), "a2");
    }

    #[test]
    fn test_begin_turn_resets_flags() {
        let mut s = state();
        s.stopped = true;
        s.side_effect_completed = true;
        s.begin_turn("again");
        assert!(!s.stopped);
        assert!(!s.side_effect_completed);
    }

    #[test]
    fn test_trim_keeps_system_prompt() {
        let mut s = state();
        s.push(Message::system("sys"));
        for i in 0..6 {
            s.push(Message::user(format!("u{i}")));
        }
        s.trim_to(3);
        assert_eq!(s.len(), 3);
        assert_eq!(s.messages()[0].text(), "sys");
        assert_eq!(s.messages()[2].text(), "u5");
    }
}
