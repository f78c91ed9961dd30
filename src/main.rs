//! Wingman 演示入口
//!
//! 初始化日志与配置，用模拟平台构建 Copilot，启动节拍调度，然后逐行读取标准输入。
//! 以 "system:" 开头的行作为脚本输入，"exit" 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use wingman::config::{load_config, AppConfig};
use wingman::core::{CopilotBuilder, ShutdownManager, ShutdownReason, TickScheduler};
use wingman::intent::InputEvent;
use wingman::lifecycle::LifecycleEvent;
use wingman::platform::SimulatedPlatform;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wingman::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let cadence = cfg.lifecycle.cadence();

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    // 生命周期事件（包括后台 tick 产生的）统一在这里输出
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<LifecycleEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Some(message) = event.user_message() {
                println!("[event] {message}");
            }
        }
    });

    let platform = Arc::new(SimulatedPlatform::new());
    let copilot = Arc::new(
        CopilotBuilder::new(cfg, platform)
            .with_developer_prompt_from_file(None)
            .with_event_channel(event_tx)
            .build(),
    );
    let scheduler = TickScheduler::new(cadence, shutdown.token()).spawn(Arc::clone(&copilot));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Enter new input (or 'exit' to quit):");
    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            shutdown.shutdown(ShutdownReason::InputClosed);
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            shutdown.shutdown(ShutdownReason::UserInitiated);
            break;
        }

        let input = match line.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("system:") => InputEvent::script(line[7..].trim()),
            _ => InputEvent::user(line),
        };
        let outcome = copilot.handle_input(input).await;
        for response in outcome
            .classification
            .response_content
            .iter()
            .chain(outcome.synthesis_response.iter())
        {
            println!("{response}");
        }
        for command in &outcome.commands {
            tracing::debug!(command = ?command, "synthesized");
        }
    }

    if let Err(e) = scheduler.await {
        tracing::warn!(error = %e, "tick scheduler ended abnormally");
    }
    match copilot.summarize_history().await {
        Ok(summary) => println!("\nSession summary:\n{summary}"),
        Err(e) => tracing::warn!(error = %e, "session summary unavailable"),
    }
    copilot.shutdown().await;
    Ok(())
}
