use std::sync::Arc;
use tracing::info;

use siteaudit::core::rules::RuleRegistry;
use siteaudit::{AuditPipeline, NullStore};

fn usage() -> ! {
    eprintln!(
        "usage: siteaudit <root-url> [--max-pages N] [--max-depth N] [--concurrency N] [--render] [--traffic N]"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut root_url: Option<String> = None;
    let mut config = siteaudit::load_config();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max-pages" => match iter.next().and_then(|v| v.parse().ok()) {
                Some(v) => config.max_pages = v,
                None => usage(),
            },
            "--max-depth" => match iter.next().and_then(|v| v.parse().ok()) {
                Some(v) => config.max_depth = v,
                None => usage(),
            },
            "--concurrency" => match iter.next().and_then(|v| v.parse().ok()) {
                Some(v) => config.concurrency = v,
                None => usage(),
            },
            "--traffic" => match iter.next().and_then(|v| v.parse().ok()) {
                Some(v) => config.monthly_traffic = v,
                None => usage(),
            },
            "--render" => config.js_render = true,
            other if other.starts_with('-') => usage(),
            other => root_url = Some(other.to_string()),
        }
    }

    let Some(root_url) = root_url else { usage() };

    info!(%root_url, max_pages = config.max_pages, "starting audit");
    let rules = Arc::new(RuleRegistry::builtin());
    let pipeline = AuditPipeline::new(NullStore, rules);
    let report = pipeline.run(&root_url, config).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
