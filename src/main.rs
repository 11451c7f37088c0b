//! Friday - Rust 辅导智能体编排系统
//!
//! 入口：初始化日志、加载配置、装配存储与协作者，启动 HTTP 服务。

use std::sync::Arc;

use anyhow::Context;
use friday::agents::create_agents_from_config;
use friday::api::create_router;
use friday::config::load_config;
use friday::core::Orchestrator;
use friday::storage::Storage;
use friday::verifier::BasicClaimVerifier;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        friday::config::AppConfig::default()
    });

    let data_dir = cfg.app.resolved_data_dir();
    let storage = Arc::new(
        Storage::new(
            &data_dir.join("friday.sqlite3"),
            &data_dir.join("audit.jsonl"),
        )
        .context("Failed to open storage")?,
    );

    let (ocr, solver, tutor) = create_agents_from_config(&cfg);
    let addr = format!("{}:{}", cfg.api.host, cfg.api.port);
    let orchestrator = Arc::new(Orchestrator::new(
        cfg,
        storage,
        ocr,
        solver,
        tutor,
        Arc::new(BasicClaimVerifier),
    ));

    let app = create_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("friday orchestrator listening on {}", addr);
    axum::serve(listener, app).await.context("Server failed")?;

    Ok(())
}
