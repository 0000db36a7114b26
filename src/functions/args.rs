//! 匹配完成的调用参数：参数名 -> 值

use serde_json::{Map, Value};

/// 成功匹配后恰好包含函数全部必需参数名
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArguments(Map<String, Value>);

impl ParsedArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// 字符串参数；非字符串值按 JSON 文本返回，缺失时为空串
    pub fn str(&self, name: &str) -> String {
        match self.0.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ParsedArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
