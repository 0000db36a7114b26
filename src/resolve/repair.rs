//! 参数修复：把可能畸形的参数块变成合法的 JSON 对象
//!
//! 后端有时直接给对象，有时给"几乎是 JSON"的字符串（单引号、`None`、未转义换行、缺右括号、
//! 尾逗号、```json 代码块、多余说明文字）。按顺序处理，首个成功即停：
//! 1. 已是对象：原样使用
//! 2. 字符串：严格解析；失败则规范化 + 宽松修复后再解析
//! 3. 值为 `{description: ...}` 占位包装时，解包为 description
//! 4. 含反斜杠的字符串值：去掉残留引号/换行并解码字面转义序列，解码失败保留原值
//!
//! 任何一步都得不到对象时返回 Unparseable（可重试，由调用方决定）。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::ResolveError;

/// 仅由 schema 元数据组成的包装对象里允许出现的键
const WRAPPER_KEYS: &[&str] = &["description", "type", "title", "default", "example", "examples"];

pub fn repair(raw: &Value) -> Result<Map<String, Value>, ResolveError> {
    let mut map = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(s) => parse_blob(s, 0)?,
        other => {
            return Err(ResolveError::Unparseable(format!(
                "expected an object, got {}",
                truncate(&other.to_string(), 120)
            )))
        }
    };
    unwrap_descriptions(&mut map);
    fix_escapes(&mut map);
    Ok(map)
}

fn parse_blob(text: &str, depth: u8) -> Result<Map<String, Value>, ResolveError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    let parsed = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => {
            let normalized = normalize(text);
            let repaired = balance_json(&normalized);
            tracing::debug!(raw = %truncate(text, 300), repaired = %truncate(&repaired, 300), "repairing arguments");
            serde_json::from_str::<Value>(&repaired).map_err(|e| {
                ResolveError::Unparseable(format!("{e} in `{}`", truncate(text, 120)))
            })?
        }
    };
    match parsed {
        Value::Object(map) => Ok(map),
        // 参数被再次 JSON 编码成字符串
        Value::String(inner) if depth == 0 => parse_blob(&inner, depth + 1),
        Value::Array(items) if items.len() == 1 && items[0].is_object() => {
            Ok(items.into_iter().next().and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            }).unwrap_or_default())
        }
        other => Err(ResolveError::Unparseable(format!(
            "expected an object, got `{}`",
            truncate(&other.to_string(), 120)
        ))),
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// 取出代码块内容，折叠换行，解开被双重引号包住的 "https"
fn normalize(text: &str) -> String {
    let body = fence_regex()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    body.replace(['\n', '\r'], " ").replace("\"https\"", "https")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '+')
}

/// 字符串外的裸词：None/null -> ""，True/False -> true/false，数字原样，其余加引号
fn map_word(word: &str) -> String {
    match word {
        "None" | "null" | "Null" | "NULL" => "\"\"".to_string(),
        "True" | "true" => "true".to_string(),
        "False" | "false" => "false".to_string(),
        w if w.parse::<f64>().is_ok() && !w.starts_with('+') => w.to_string(),
        w => format!("\"{w}\""),
    }
}

fn trim_trailing_comma(out: &mut String) {
    let len = out.trim_end().len();
    if out[..len].ends_with(',') {
        out.truncate(len - 1);
    }
}

/// 字符串内的同种引号后面（跳过空白）是结构符、下一个引号或输入结束时才闭合字符串，
/// 否则是未转义的内层引号
fn closes_string(rest: &[char]) -> bool {
    match rest.iter().find(|c| !c.is_whitespace()) {
        None => true,
        Some(c) => matches!(c, ',' | '}' | ']' | ':' | '"' | '\''),
    }
}

/// 容器内两个值之间缺逗号时补上：`{"a": "x" "b": "y"}`
fn insert_missing_comma(out: &mut String, stack: &[char]) {
    if stack.is_empty() {
        return;
    }
    let ends_value = out
        .trim_end()
        .chars()
        .last()
        .is_some_and(|last| matches!(last, '"' | '}' | ']') || last.is_alphanumeric());
    if ends_value {
        out.push(',');
    }
}

/// 宽松修复：从首个 `{`/`[` 开始扫描，单引号转双引号，转义内层引号，补缺失的逗号，
/// 丢弃多余右括号与尾逗号，补齐未闭合的字符串与括号，忽略顶层结构之后的文字
fn balance_json(text: &str) -> String {
    let Some(start) = text.find(['{', '[']) else {
        return text.trim().to_string();
    };
    let chars: Vec<char> = text[start..].chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if escaped {
                // `\'` 不是合法的 JSON 转义
                if c == '\'' {
                    out.pop();
                }
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                out.push(c);
                escaped = true;
            } else if c == q && closes_string(&chars[i + 1..]) {
                out.push('"');
                quote = None;
            } else if c == '"' {
                out.push_str("\\\"");
            } else if c == '\t' {
                out.push_str("\\t");
            } else if c.is_control() {
                out.push(' ');
            } else {
                out.push(c);
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => {
                insert_missing_comma(&mut out, &stack);
                quote = Some(c);
                out.push('"');
            }
            '{' | '[' => {
                insert_missing_comma(&mut out, &stack);
                stack.push(c);
                out.push(c);
            }
            '}' | ']' => {
                let open = if c == '}' { '{' } else { '[' };
                if stack.last() == Some(&open) {
                    trim_trailing_comma(&mut out);
                    stack.pop();
                    out.push(c);
                    if stack.is_empty() {
                        break;
                    }
                }
            }
            ',' | ':' => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            c if is_word_char(c) => {
                insert_missing_comma(&mut out, &stack);
                let begin = i;
                while i + 1 < chars.len() && is_word_char(chars[i + 1]) {
                    i += 1;
                }
                let word: String = chars[begin..=i].iter().collect();
                out.push_str(&map_word(&word));
            }
            _ => {}
        }
        i += 1;
    }

    if quote.is_some() {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    if out.trim_end().ends_with(':') {
        out.push_str("\"\"");
    }
    while let Some(open) = stack.pop() {
        trim_trailing_comma(&mut out);
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

/// `{"header": {"description": "Otello"}}` -> `{"header": "Otello"}`
fn unwrap_descriptions(map: &mut Map<String, Value>) {
    for value in map.values_mut() {
        let replacement = match value {
            Value::Object(inner)
                if inner.contains_key("description")
                    && inner.keys().all(|k| WRAPPER_KEYS.contains(&k.as_str())) =>
            {
                inner.get("description").cloned()
            }
            _ => None,
        };
        if let Some(r) = replacement {
            *value = r;
        }
    }
}

fn fix_escapes(map: &mut Map<String, Value>) {
    for (key, value) in map.iter_mut() {
        let Value::String(s) = value else { continue };
        if !s.contains('\\') {
            continue;
        }
        let stripped = s.replace('\n', " ").replace('"', "");
        *s = match decode_escapes(&stripped) {
            // 解码后仍含反斜杠视为失败，保证再次修复时结果不变
            Some(decoded) if !decoded.contains('\\') => decoded,
            _ => {
                tracing::warn!("Could not decode escapes in argument '{}', keeping it as is", key);
                stripped
            }
        };
    }
}

fn decode_escapes(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '/' => out.push('/'),
            '\\' => out.push('\\'),
            'u' => {
                let high = read_hex4(&mut chars)?;
                let code = if (0xD800..0xDC00).contains(&high) {
                    if chars.next()? != '\\' || chars.next()? != 'u' {
                        return None;
                    }
                    let low = read_hex4(&mut chars)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return None;
                    }
                    0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                } else {
                    high
                };
                out.push(char::from_u32(code)?);
            }
            _ => return None,
        }
    }
    Some(out)
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.len() != 4 {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}
