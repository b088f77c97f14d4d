use std::sync::Arc;
use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use drive_upload::config::{Config, DEFAULT_CONFIG_FILE};
use drive_upload::core::{ConflictResolver, UploadContent};
use drive_upload::utils::{format_bytes, format_progress};
use drive_upload::{ConflictBehavior, FileContent, HttpRequestor, UploadConfiguration, UploadError, UploadProgress, Uploader};

/// Asks on the terminal what to do about an existing file.
struct PromptResolver;

#[async_trait]
impl ConflictResolver for PromptResolver {
    async fn resolve_conflict(&self, error: &UploadError) -> Option<ConflictBehavior> {
        println!("Conflict: {}", error);
        println!("[r]eplace, re[n]ame or [f]ail?");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        stdin.read_line(&mut line).await.ok()?;

        match line.trim() {
            "r" | "replace" => Some(ConflictBehavior::Replace),
            "n" | "rename" => Some(ConflictBehavior::Rename),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = Config::load_config(&config_path)?;

    let content = FileContent::open(&config.file_path)
        .await
        .with_context(|| format!("Failed to open file: {}", config.file_path.display()))?;
    let file_size = format_bytes(content.size());

    let requestor = HttpRequestor::new(Some(config.token.clone()))?;
    let upload_config = UploadConfiguration::new(config.item_url.clone(), config.file_name()?, Arc::new(content))
        .with_commit(config.use_commit)
        .with_fragment_timeout(config.fragment_timeout())
        .with_conflict_resolver(Arc::new(PromptResolver))
        .with_progress(Arc::new(|progress: UploadProgress| println!("Uploaded: {}", format_progress(&progress))));

    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation_token.cancel();
            }
        }
    });

    let item = Uploader::new(Arc::new(requestor))
        .upload_with_cancellation(&upload_config, cancellation_token)
        .await?;

    println!("Upload completed. {} -> item {}", file_size, item.id);
    Ok(())
}
