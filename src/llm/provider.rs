//! 后端选择：由配置显式构造客户端（不使用全局预建实例）
//!
//! - local: 本地 Ollama 兼容服务（默认 http://localhost:11434/v1，无需密钥）
//! - llama: 托管 Llama API（LLAMA_API_KEY）
//! - openai: OpenAI 官方端点（OPENAI_API_KEY）

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSection;
use crate::llm::{CompletionClient, LlmError, OpenAiClient};

pub const LOCAL_BASE_URL: &str = "http://localhost:11434/v1";
pub const LLAMA_BASE_URL: &str = "https://api.llama-api.com";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Local,
    LlamaApi,
    OpenAi,
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "ollama" => Ok(Provider::Local),
            "llama" => Ok(Provider::LlamaApi),
            "openai" => Ok(Provider::OpenAi),
            other => Err(LlmError::Config(format!("unknown provider: {other}"))),
        }
    }
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Local => LOCAL_BASE_URL,
            Provider::LlamaApi => LLAMA_BASE_URL,
            Provider::OpenAi => OPENAI_BASE_URL,
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Local => "LOCAL_API_KEY",
            Provider::LlamaApi => "LLAMA_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// 本地服务可以不带密钥
    pub fn requires_key(&self) -> bool {
        !matches!(self, Provider::Local)
    }
}

/// 根据 [llm] 配置与环境变量创建客户端
pub fn create_client(cfg: &LlmSection) -> Result<Arc<dyn CompletionClient>, LlmError> {
    let provider: Provider = cfg.provider.parse()?;
    let key_env = cfg
        .api_key_env
        .clone()
        .unwrap_or_else(|| provider.api_key_env().to_string());
    let api_key = std::env::var(&key_env).ok();
    if api_key.is_none() && provider.requires_key() {
        return Err(LlmError::Config(format!("{key_env} is not set")));
    }

    let base_url = cfg
        .base_url
        .clone()
        .unwrap_or_else(|| provider.default_base_url().to_string());
    tracing::info!("Using {:?} backend at {} ({})", provider, base_url, cfg.model);

    let client = OpenAiClient::new(
        &base_url,
        &cfg.model,
        api_key.as_deref(),
        Duration::from_secs(cfg.timeouts.request),
    )?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("Ollama".parse::<Provider>().unwrap(), Provider::Local);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!(matches!("palm".parse::<Provider>(), Err(LlmError::Config(_))));
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let cfg = LlmSection {
            api_key_env: Some("CALLFORGE_TEST_UNSET_KEY".to_string()),
            ..LlmSection::default()
        };
        assert!(create_client(&cfg).is_ok());
    }

    #[test]
    fn test_hosted_provider_requires_key() {
        let cfg = LlmSection {
            provider: "llama".to_string(),
            api_key_env: Some("CALLFORGE_TEST_UNSET_KEY".to_string()),
            ..LlmSection::default()
        };
        assert!(matches!(create_client(&cfg), Err(LlmError::Config(_))));
    }
}
