//! 意图分类
//!
//! 路由状态机只消费 Intent 的布尔信号，不关心具体短语；默认实现 KeywordClassifier 用正则规则，
//! 各类规则可由配置 [classifier] 覆盖。

use regex::Regex;
use serde::Serialize;

use crate::config::ClassifierSection;
use crate::workflow::WorkerRole;

/// 超过该词数的请求视为复杂请求
pub const DEFAULT_PLAN_WORD_THRESHOLD: usize = 30;

/// 对一条用户消息的分类结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Intent {
    /// 明确提到远程委托（a2a / remote agent）
    pub delegation: bool,
    /// 请求批量导入
    pub ingestion: bool,
    /// 「只跑一批就停」
    pub one_shot: bool,
    /// 含多步骤指示（then / after that / first ...）
    pub multi_step: bool,
    /// 明确要求检索知识库
    pub explicit_retrieval: bool,
    /// 常识类问法（what is / explain ...）
    pub general_knowledge: bool,
    /// 提到媒体或搜索
    pub mentions_media: bool,
    /// 含复杂度关键词（comprehensive / full report ...）
    pub complex: bool,
}

/// 可插拔分类器
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;

    /// 规划为空时选择单个 worker 的角色
    fn fallback_role(&self, text: &str) -> WorkerRole;

    /// 是否交给多任务调度器
    fn should_plan(&self, text: &str) -> bool {
        let intent = self.classify(text);
        intent.multi_step || intent.complex || text.split_whitespace().count() > DEFAULT_PLAN_WORD_THRESHOLD
    }
}

const DELEGATION: &[&str] = &[
    r"\ba2a\b",
    r"\bremote\s+(agent|tools?)\b",
    r"\bdiscover\s+(agents?|tools?)\b",
    r"\bdelegate\b",
];

const INGESTION: &[&str] = &[
    r"\bingest\s+(now|movies?|items?|\d+|batch)\b",
    r"\bstart\s+ingesting\b",
    r"\badd\s+to\s+(rag|knowledge)\b",
    r"\bprocess\s+subtitles?\b",
];

const ONE_SHOT: &[&str] = &[
    r"\bstop\b",
    r"\bthen\s+stop\b",
    r"\bdon'?t\s+continue\b",
    r"\bdon'?t\s+go\s+on\b",
];

const MULTI_STEP: &[&str] = &[
    r"\s+and\s+then\s+",
    r"\s+then\s+",
    r"\s+after\s+that\s+",
    r"\s+next\s+",
    r"\bfirst\b",
    r"\bresearch.*analyze\b",
    r"\bfind.*summarize\b",
];

const EXPLICIT_RETRIEVAL: &[&str] = &[
    r"\b(using|use|with|search|query)\s+rag\b",
    r"\brag\s+tool\b",
    r"\bknowledge\s+base\b",
];

const GENERAL_KNOWLEDGE: &[&str] = &[r"\bwhat\s+is\b", r"\bwho\s+is\b", r"\bexplain\b", r"\btell\s+me\s+about\b"];

const MEDIA: &[&str] = &[r"\bmovies?\b", r"\bplex\b", r"\bsearch\b", r"\bfind\b", r"\bshow\b", r"\bmedia\b"];

const COMPLEX: &[&str] = &[
    r"\bcomprehensive\b",
    r"\bdetailed\s+analysis\b",
    r"\bfull\s+report\b",
    r"\bresearch\s+and\b",
    r"\banalyze\s+and\b",
    r"\bcompare\s+and\b",
    r"\bgather.*create\b",
    r"\bsearch.*write\b",
];

/// fallback 角色的关键词，按优先级排列
const ROLE_KEYWORDS: &[(WorkerRole, &str)] = &[
    (WorkerRole::Ingester, r"plex|ingest|subtitle"),
    (WorkerRole::Coder, r"code"),
    (WorkerRole::Analyst, r"analy[sz]e"),
    (WorkerRole::Writer, r"write"),
    (WorkerRole::Planner, r"plan|todo"),
];

/// 基于正则关键词的分类器
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    delegation: Regex,
    ingestion: Regex,
    one_shot: Regex,
    multi_step: Regex,
    explicit_retrieval: Regex,
    general_knowledge: Regex,
    media: Regex,
    complex: Regex,
    roles: Vec<(WorkerRole, Regex)>,
    plan_word_threshold: usize,
}

impl KeywordClassifier {
    /// 内置规则
    pub fn new() -> Result<Self, regex::Error> {
        Self::from_config(&ClassifierSection::default())
    }

    /// 配置中给出的类别覆盖内置规则
    pub fn from_config(cfg: &ClassifierSection) -> Result<Self, regex::Error> {
        let mut roles = Vec::with_capacity(ROLE_KEYWORDS.len());
        for (role, pattern) in ROLE_KEYWORDS {
            roles.push((*role, compile(&[*pattern])?));
        }
        Ok(Self {
            delegation: pick(&cfg.delegation, DELEGATION)?,
            ingestion: pick(&cfg.ingestion, INGESTION)?,
            one_shot: pick(&cfg.one_shot, ONE_SHOT)?,
            multi_step: pick(&cfg.multi_step, MULTI_STEP)?,
            explicit_retrieval: pick(&cfg.explicit_retrieval, EXPLICIT_RETRIEVAL)?,
            general_knowledge: pick(&cfg.general_knowledge, GENERAL_KNOWLEDGE)?,
            media: pick(&cfg.media, MEDIA)?,
            complex: pick(&cfg.complex, COMPLEX)?,
            roles,
            plan_word_threshold: cfg.plan_word_threshold.unwrap_or(DEFAULT_PLAN_WORD_THRESHOLD),
        })
    }
}

fn pick(custom: &Option<Vec<String>>, builtin: &[&str]) -> Result<Regex, regex::Error> {
    match custom {
        Some(patterns) => compile(patterns),
        None => compile(builtin),
    }
}

/// 多条规则合并为一个忽略大小写的交替正则；空列表永不匹配
fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Regex, regex::Error> {
    if patterns.is_empty() {
        return Regex::new(r"[^\s\S]");
    }
    let joined = patterns
        .iter()
        .map(|p| format!("(?:{})", p.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){joined}"))
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Intent {
        Intent {
            delegation: self.delegation.is_match(text),
            ingestion: self.ingestion.is_match(text),
            one_shot: self.one_shot.is_match(text),
            multi_step: self.multi_step.is_match(text),
            explicit_retrieval: self.explicit_retrieval.is_match(text),
            general_knowledge: self.general_knowledge.is_match(text),
            mentions_media: self.media.is_match(text),
            complex: self.complex.is_match(text),
        }
    }

    fn fallback_role(&self, text: &str) -> WorkerRole {
        self.roles
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(role, _)| *role)
            .unwrap_or(WorkerRole::Researcher)
    }

    fn should_plan(&self, text: &str) -> bool {
        let intent = self.classify(text);
        intent.multi_step || intent.complex || text.split_whitespace().count() > self.plan_word_threshold
    }
}
