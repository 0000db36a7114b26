//! 参数匹配：修复后的参数与函数描述对齐
//!
//! 必需参数按声明顺序检查：存在则复制（`"None"`/`"null"`/null 视为空字符串），
//! 缺失时用默认值表补齐，否则报 MissingRequiredParam。可选参数出现时原样复制。
//! 描述之外的键记为多余参数，仅作提示，不阻断调用。

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::core::ResolveError;
use crate::functions::{FunctionDescriptor, ParsedArguments};

/// 匹配结果：可直接调用的参数，以及被丢弃 / 被默认值补齐的参数名
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub arguments: ParsedArguments,
    pub redundant: Vec<String>,
    pub defaulted: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParameterMatcher {
    defaults: HashMap<String, Value>,
}

impl ParameterMatcher {
    pub fn new(defaults: HashMap<String, Value>) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &HashMap<String, Value> {
        &self.defaults
    }

    pub fn match_arguments(
        &self,
        descriptor: &FunctionDescriptor,
        repaired: &Map<String, Value>,
    ) -> Result<MatchOutcome, ResolveError> {
        let mut arguments = ParsedArguments::new();
        let mut defaulted = Vec::new();

        for name in &descriptor.parameters {
            match repaired.get(name) {
                Some(value) => arguments.insert(name, null_to_empty(value)),
                None => match self.defaults.get(name) {
                    Some(default) => {
                        tracing::debug!("Filling '{}' of {} with default", name, descriptor.name);
                        arguments.insert(name, default.clone());
                        defaulted.push(name.clone());
                    }
                    None => {
                        return Err(ResolveError::MissingRequiredParam {
                            function: descriptor.name.clone(),
                            param: name.clone(),
                        })
                    }
                },
            }
        }
        for name in &descriptor.optional {
            if let Some(value) = repaired.get(name) {
                arguments.insert(name, value.clone());
            }
        }

        let redundant: Vec<String> = repaired
            .keys()
            .filter(|k| !descriptor.parameters.contains(k) && !descriptor.optional.contains(k))
            .cloned()
            .collect();
        if !redundant.is_empty() {
            tracing::warn!(
                "Dropping redundant parameters [{}] for {}",
                redundant.join(", "),
                descriptor.name
            );
        }

        Ok(MatchOutcome {
            arguments,
            redundant,
            defaulted,
        })
    }
}

fn null_to_empty(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::String(s) if s == "None" || s == "null" => Value::String(String::new()),
        other => other.clone(),
    }
}
