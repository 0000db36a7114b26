//! 对话持久化
//!
//! 将消息历史写入/从 JSON 文件加载，供聊天前端跨进程恢复同一对话（可选使用）。

use std::path::{Path, PathBuf};

use crate::memory::{HistoryLimits, Message, MessageHistory};

/// 单文件 JSON 持久化：每条消息含 role + content
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 加载历史；文件不存在时返回空历史。加载过程同样受 limits 约束
    pub fn load(&self, limits: HistoryLimits) -> anyhow::Result<MessageHistory> {
        if !self.path.exists() {
            return Ok(MessageHistory::new(limits));
        }
        let data = std::fs::read_to_string(&self.path)?;
        let messages: Vec<Message> = serde_json::from_str(&data)?;
        Ok(MessageHistory::from_messages(limits, messages))
    }

    /// 写入历史；父目录不存在时自动创建
    pub fn save(&self, history: &MessageHistory) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(history.messages())?)?;
        Ok(())
    }
}
