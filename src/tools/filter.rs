//! 工具过滤：从全部工具中挑出与当前请求相关的子集再绑定给模型
//!
//! 路由状态机不依赖过滤内部逻辑，只要求拿回一个（可能是全部的）工具集合。

use std::collections::HashSet;

use crate::tools::ToolSpec;

/// 外部协作者：select_relevant(text, all) -> 子集
pub trait ToolFilter: Send + Sync {
    fn select_relevant(&self, text: &str, all: &[ToolSpec]) -> Vec<ToolSpec>;
}

/// 不做过滤，返回全部工具
#[derive(Debug, Default, Clone, Copy)]
pub struct AllTools;

impl ToolFilter for AllTools {
    fn select_relevant(&self, _text: &str, all: &[ToolSpec]) -> Vec<ToolSpec> {
        all.to_vec()
    }
}

/// 按名称白名单过滤（用于角色工具子集）
#[derive(Debug, Default, Clone)]
pub struct NamedTools {
    names: HashSet<String>,
}

impl NamedTools {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToolFilter for NamedTools {
    fn select_relevant(&self, _text: &str, all: &[ToolSpec]) -> Vec<ToolSpec> {
        all.iter().filter(|s| self.names.contains(&s.name)).cloned().collect()
    }
}
