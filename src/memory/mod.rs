//! 记忆层：对话历史（有界消息日志）与持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{HistoryLimits, Message, MessageHistory, Role};
pub use persistence::HistoryStore;
