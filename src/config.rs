//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__TURN__MAX_STEPS=8`）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub turn: TurnSection,
    pub scheduler: SchedulerSection,
    pub bus: BusSection,
    pub classifier: ClassifierSection,
}

/// [app] 段：应用名、系统提示词、对话保留条数
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    pub system_prompt: Option<String>,
    /// 两轮之间保留的最大消息数（含 system）
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            system_prompt: None,
            max_history: default_max_history(),
        }
    }
}

fn default_max_history() -> usize {
    20
}

/// [llm] 段：模型调用超时与停止轮询间隔
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LlmSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_request_timeout() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    50
}

/// [tools] 段：单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [turn] 段：单轮步数上限、远程委托工具前缀、检索与批量导入工具
#[derive(Debug, Clone, Deserialize)]
pub struct TurnSection {
    /// 单轮内最多执行的节点数，防止死循环
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 远程委托工具族的名称前缀
    #[serde(default = "default_delegation_prefix")]
    pub delegation_prefix: String,
    #[serde(default = "default_retrieval_tool")]
    pub retrieval_tool: String,
    /// 检索结果取前 N 段作为上下文
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_batch_tool")]
    pub batch_tool: String,
    /// 单次批量导入条数
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for TurnSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            delegation_prefix: default_delegation_prefix(),
            retrieval_tool: default_retrieval_tool(),
            retrieval_top_k: default_retrieval_top_k(),
            batch_tool: default_batch_tool(),
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_max_steps() -> usize {
    12
}

fn default_delegation_prefix() -> String {
    "a2a_".to_string()
}

fn default_retrieval_tool() -> String {
    "rag_search".to_string()
}

fn default_retrieval_top_k() -> usize {
    3
}

fn default_batch_tool() -> String {
    "ingest_batch".to_string()
}

fn default_batch_limit() -> usize {
    5
}

/// [scheduler] 段：worker 工具轮数上限、角色工具覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// 单个 worker 在一次任务中最多几轮工具调用
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// 角色名 -> 工具名列表；未列出的角色使用内置默认
    #[serde(default)]
    pub role_tools: HashMap<String, Vec<String>>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            role_tools: HashMap::new(),
        }
    }
}

fn default_max_tool_rounds() -> usize {
    4
}

/// [bus] 段：消息路由参数
#[derive(Debug, Clone, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_busy_penalty")]
    pub busy_penalty: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_message_timeout_secs")]
    pub message_timeout_secs: u64,
    /// worker 空闲时拉取队列的间隔
    #[serde(default = "default_bus_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            busy_penalty: default_busy_penalty(),
            max_retries: default_max_retries(),
            message_timeout_secs: default_message_timeout_secs(),
            poll_interval_ms: default_bus_poll_ms(),
        }
    }
}

fn default_busy_penalty() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_message_timeout_secs() -> u64 {
    60
}

fn default_bus_poll_ms() -> u64 {
    20
}

/// [classifier] 段：意图关键词（正则，忽略大小写）；未设置的类别使用内置规则
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClassifierSection {
    pub delegation: Option<Vec<String>>,
    pub ingestion: Option<Vec<String>>,
    pub one_shot: Option<Vec<String>>,
    pub multi_step: Option<Vec<String>>,
    pub explicit_retrieval: Option<Vec<String>>,
    pub general_knowledge: Option<Vec<String>>,
    pub media: Option<Vec<String>>,
    pub complex: Option<Vec<String>>,
    /// 超过该词数的请求走多任务规划
    pub plan_word_threshold: Option<usize>,
}

/// 加载配置：config_path 优先，其次 config/default.toml，最后环境变量覆盖
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.request_timeout_secs, 120);
        assert_eq!(cfg.llm.poll_interval(), Duration::from_millis(50));
        assert_eq!(cfg.turn.delegation_prefix, "a2a_");
        assert_eq!(cfg.bus.max_retries, 3);
        assert_eq!(cfg.bus.busy_penalty, 100);
        assert!(cfg.classifier.ingestion.is_none());
    }

    #[test]
    fn test_load_from_file_overrides_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[turn]\nmax_steps = 4\nbatch_limit = 2\n\n[classifier]\none_shot = [\"\\\\bonce\\\\b\"]\n\n[scheduler.role_tools]\ncoder = [\"echo\"]"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.turn.max_steps, 4);
        assert_eq!(cfg.turn.batch_limit, 2);
        assert_eq!(cfg.turn.retrieval_tool, "rag_search");
        assert_eq!(cfg.classifier.one_shot, Some(vec!["\\bonce\\b".to_string()]));
        assert_eq!(cfg.scheduler.role_tools["coder"], vec!["echo".to_string()]);
        assert_eq!(cfg.llm.request_timeout_secs, 120);
    }
}
