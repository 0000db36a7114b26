//! 对话历史：有界、有序的消息日志
//!
//! 历史本身就是对话：只允许 append / reset，不重排。超过条数上限或序列化字节上限时，
//! 保留开头的配置消息（默认前 3 条）与最新一条，丢弃中间部分。

use serde::{Deserialize, Serialize};

/// 消息角色（与 Chat Completion API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 单条消息，创建后不可变
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 历史上限：条数、序列化字节数、截断时保留的开头条数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_messages: usize,
    pub max_bytes: usize,
    pub keep_head: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_messages: 10,
            max_bytes: 2500,
            keep_head: 3,
        }
    }
}

/// 单次对话的消息历史；由一个对话独占，不可被多个解析调用并发修改
#[derive(Clone, Debug)]
pub struct MessageHistory {
    messages: Vec<Message>,
    limits: HistoryLimits,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(HistoryLimits::default())
    }
}

impl MessageHistory {
    pub fn new(limits: HistoryLimits) -> Self {
        // 截断后为 keep_head + 1 条，必须不超过条数上限
        let keep_head = limits.keep_head.min(limits.max_messages.saturating_sub(1));
        Self {
            messages: Vec::new(),
            limits: HistoryLimits {
                keep_head,
                ..limits
            },
        }
    }

    /// 以给定消息初始化（逐条 append，同样受上限约束）
    pub fn from_messages(limits: HistoryLimits, messages: impl IntoIterator<Item = Message>) -> Self {
        let mut history = Self::new(limits);
        for m in messages {
            history.append(m);
        }
        history
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    pub fn append(&mut self, msg: Message) {
        self.messages.push(msg);
        self.enforce_limits();
    }

    /// 清空后以新消息重新开始
    pub fn reset(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.clear();
        for m in messages {
            self.append(m);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 序列化后的字节数（与请求体中 messages 字段一致的 JSON 形式）
    pub fn byte_size(&self) -> usize {
        serde_json::to_string(&self.messages)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// 第一条 user 消息（两阶段选择时作为任务描述）
    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }

    fn exceeds_limits(&self) -> bool {
        self.messages.len() > self.limits.max_messages || self.byte_size() > self.limits.max_bytes
    }

    /// 超限时保留开头 keep_head 条与刚追加的一条（纠错反馈必须进入下一次请求）
    fn enforce_limits(&mut self) {
        if !self.exceeds_limits() || self.messages.len() <= self.limits.keep_head + 1 {
            return;
        }
        let newest = self.messages.pop();
        self.messages.truncate(self.limits.keep_head);
        if let Some(m) = newest {
            self.messages.push(m);
        }
        tracing::debug!(
            len = self.messages.len(),
            bytes = self.byte_size(),
            "history truncated to head"
        );
    }
}
