//! 函数注册表
//!
//! 所有可调用函数实现 Callable（descriptor / call），由调用方按请求新建 FunctionRegistry 并注册，
//! 解析引擎只通过名称查找与调用，不持有任何全局状态。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::functions::{FunctionDescriptor, ParsedArguments};

/// 函数执行错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// 普通失败：文本作为纠错反馈回传给模型
    #[error("{0}")]
    Failed(String),

    /// 要求立即停止整个解析（不再重试）
    #[error("aborted: {0}")]
    Abort(String),
}

/// 可调用函数：描述（供模型理解）与异步执行
#[async_trait]
pub trait Callable: Send + Sync {
    fn descriptor(&self) -> &FunctionDescriptor;

    async fn call(&self, args: ParsedArguments) -> Result<Value, CallError>;
}

/// 闭包包装：同步函数即可注册
pub struct FnCallable<F> {
    descriptor: FunctionDescriptor,
    f: F,
}

impl<F> FnCallable<F>
where
    F: Fn(ParsedArguments) -> Result<Value, CallError> + Send + Sync,
{
    pub fn new(descriptor: FunctionDescriptor, f: F) -> Self {
        Self { descriptor, f }
    }
}

#[async_trait]
impl<F> Callable for FnCallable<F>
where
    F: Fn(ParsedArguments) -> Result<Value, CallError> + Send + Sync,
{
    fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    async fn call(&self, args: ParsedArguments) -> Result<Value, CallError> {
        (self.f)(args)
    }
}

/// 注册表：按名称存储 Arc<dyn Callable>，保留注册顺序（决定向模型公布的顺序）
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn Callable>>,
    order: Vec<String>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册函数；描述为空（无法公布）的函数被跳过
    pub fn register(&mut self, callable: impl Callable + 'static) {
        let descriptor = callable.descriptor();
        if descriptor.is_empty() {
            tracing::warn!("Skipping function with empty descriptor");
            return;
        }
        let name = descriptor.name.clone();
        if self.functions.insert(name.clone(), Arc::new(callable)).is_none() {
            self.order.push(name);
        }
    }

    pub fn register_fn<F>(&mut self, descriptor: FunctionDescriptor, f: F)
    where
        F: Fn(ParsedArguments) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.register(FnCallable::new(descriptor, f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Callable>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(name).map(|f| f.descriptor())
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.order
            .iter()
            .filter_map(|n| self.functions.get(n).map(|f| f.descriptor()))
    }

    /// 请求体 functions 字段
    pub fn function_schemas(&self) -> Vec<Value> {
        self.descriptors().map(|d| d.to_function_schema()).collect()
    }

    /// 两阶段选择第一阶段展示的 (name, description) 列表
    pub fn names_and_descriptions(&self) -> Vec<(String, String)> {
        self.descriptors()
            .map(|d| (d.name.clone(), d.description.clone()))
            .collect()
    }
}

/// (name, description) 列表转为提示中使用的 JSON 数组
pub fn choices_json(choices: &[(String, String)]) -> Value {
    Value::Array(
        choices
            .iter()
            .map(|(name, description)| json!({ "function_name": name, "description": description }))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::ParamType;

    fn registry() -> FunctionRegistry {
        let mut r = FunctionRegistry::new();
        r.register_fn(
            FunctionDescriptor::builder("add_static")
                .description("Article")
                .param("header", ParamType::String)
                .build(),
            |args| Ok(json!({ "header": args.str("header") })),
        );
        r.register_fn(
            FunctionDescriptor::builder("assign_event").description("Event").build(),
            |_| Ok(json!("event")),
        );
        r
    }

    #[test]
    fn test_register_keeps_order() {
        let r = registry();
        assert_eq!(r.names(), vec!["add_static", "assign_event"]);
        assert_eq!(r.function_schemas()[1]["name"], "assign_event");
    }

    #[test]
    fn test_empty_descriptor_is_skipped() {
        let mut r = registry();
        r.register_fn(FunctionDescriptor::empty(), |_| Ok(Value::Null));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_reregister_replaces_without_duplicating() {
        let mut r = registry();
        r.register_fn(
            FunctionDescriptor::builder("assign_event").description("Event v2").build(),
            |_| Ok(json!("event")),
        );
        assert_eq!(r.len(), 2);
        assert_eq!(r.descriptor("assign_event").unwrap().description, "Event v2");
    }

    #[tokio::test]
    async fn test_call_through_registry() {
        let r = registry();
        let mut args = ParsedArguments::new();
        args.insert("header", json!("Špilberk"));
        let out = r.get("add_static").unwrap().call(args).await.unwrap();
        assert_eq!(out, json!({"header": "Špilberk"}));
    }

    #[test]
    fn test_choices_json() {
        let v = choices_json(&[("add_place".into(), "A place".into())]);
        assert_eq!(v, json!([{"function_name": "add_place", "description": "A place"}]));
    }
}
