//! Callforge 命令行
//!
//! 从 stdin 读取抓取到的网页文本，URL 作为第一个参数，解析为一条城市记录并以 JSON 输出到 stdout。
//! 配置文件路径可由 CALLFORGE_CONFIG 指定；设置 app.history_path 时本页的解析对话会写入该文件。

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use callforge::config::load_config;
use callforge::llm::create_client;
use callforge::memory::{HistoryStore, MessageHistory};
use callforge::records;
use callforge::{Resolver, ResolverConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖；写 stderr，stdout 只输出结果
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::var_os("CALLFORGE_CONFIG").map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let url = std::env::args().nth(1).unwrap_or_default();
    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read text from stdin")?;
    if content.trim().is_empty() {
        anyhow::bail!("No text to process on stdin");
    }

    let client = create_client(&cfg.llm).context("Failed to create completion client")?;
    let resolver = Resolver::new(client, ResolverConfig::from(&cfg.engine));

    // Ctrl-C 取消进行中的解析（含退避等待）
    let cancel = resolver.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let limits = cfg.engine.history.limits();
    let store = cfg.app.history_path.as_ref().map(HistoryStore::new);
    // 每个页面一段新对话；设置 history_path 时保存本页对话
    let mut history = MessageHistory::new(limits);

    let kind = match records::classify(&resolver, limits, &url, &content).await {
        Ok(kind) => Some(kind),
        Err(e) => {
            tracing::warn!("Could not classify content: {}", e);
            None
        }
    };

    let parsed = records::parse_content(&resolver, &mut history, &url, &content).await;
    if let Some(store) = &store {
        store.save(&history).context("Failed to save history")?;
    }
    let record = parsed.context("Could not parse content")?;

    if let Some(kind) = kind.filter(|k| *k != record.record_type) {
        tracing::warn!(
            "Classified as {} but parsed as {}",
            kind,
            record.record_type
        );
    }

    println!("{}", serde_json::to_string_pretty(&record)?);

    let (prompt, completion, total) = resolver.token_usage();
    tracing::info!(prompt, completion, total, "token usage");
    Ok(())
}
