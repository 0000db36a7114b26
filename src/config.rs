//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CALLFORGE__*` 覆盖（双下划线表示嵌套，如 `CALLFORGE__LLM__PROVIDER=local`）。
//! 重试上限、退避间隔、历史上限、可选参数默认值都是引擎配置，不是协议常量。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::memory::HistoryLimits;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 设置时，二进制在此持久化对话历史
    pub history_path: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / local / llama
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名；未设置时用 provider 的默认变量
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次往返超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    580
}

/// [engine] 段：重试预算、退避、往返上限、历史上限、可选参数默认值
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 两阶段选择中第一阶段（选函数名）的重试预算
    #[serde(default = "default_max_retries")]
    pub selection_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// 传输错误不消耗重试预算，但受此上限约束
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,
    /// 单个重试控制器允许的最大往返次数，超出视为反馈循环不收敛
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: usize,
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    /// 是否把模型每次原始回复以 assistant 消息写回历史
    #[serde(default = "default_echo_responses")]
    pub echo_responses: bool,
    #[serde(default)]
    pub history: HistorySection,
    /// 可识别的可选参数及其默认值（缺失时代入）
    #[serde(default = "default_param_defaults")]
    pub defaults: HashMap<String, String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            selection_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_transport_retries: default_max_transport_retries(),
            max_round_trips: default_max_round_trips(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
            echo_responses: default_echo_responses(),
            history: HistorySection::default(),
            defaults: default_param_defaults(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_max_transport_retries() -> u32 {
    3
}

fn default_max_round_trips() -> usize {
    32
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

fn default_echo_responses() -> bool {
    true
}

fn default_param_defaults() -> HashMap<String, String> {
    HashMap::from([("address".to_string(), "Brno, Czech Republic".to_string())])
}

/// [engine.history] 段
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_keep_head")]
    pub keep_head: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_bytes: default_max_bytes(),
            keep_head: default_keep_head(),
        }
    }
}

fn default_max_messages() -> usize {
    10
}

fn default_max_bytes() -> usize {
    2500
}

fn default_keep_head() -> usize {
    3
}

impl HistorySection {
    pub fn limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_messages: self.max_messages,
            max_bytes: self.max_bytes,
            keep_head: self.keep_head,
        }
    }
}

impl EngineSection {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

/// 从 config 目录加载配置，环境变量 CALLFORGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CALLFORGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
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
        config::Environment::with_prefix("CALLFORGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
