//! Callforge - LLM 函数调用解析引擎
//!
//! 把不稳定的 Chat Completion 回答变成可靠的类型化函数调用：修复近似 JSON 的参数、
//! 与函数描述对齐、调用，失败时把纠错反馈写回对话并在预算内重试。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与恢复策略
//! - **functions**: 函数描述、按请求构建的注册表、调用器
//! - **llm**: Completion 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 有界对话历史与持久化
//! - **records**: 城市记录的解析与分类函数
//! - **resolve**: 参数修复、参数匹配、重试控制、两阶段选择与 Resolver 入口

pub mod config;
pub mod core;
pub mod functions;
pub mod llm;
pub mod memory;
pub mod records;
pub mod resolve;

pub use resolve::{Invocation, Resolver, ResolverConfig};
