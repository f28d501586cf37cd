use objsync_lib::core::CompletionHook;
use objsync_lib::dirs::app_config_dir;
use objsync_lib::logging::init_logging;
use objsync_lib::{AppState, Storage};

const USAGE: &str = "usage: objsync [sync|index|status]";

async fn run(state: &AppState, command: &str) -> anyhow::Result<()> {
    match command {
        "sync" => {
            let (hook, done) = CompletionHook::channel();
            state.synchronizer.start(Some(hook));

            tokio::select! {
                status = done => match status {
                    Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                    // 同步中止时回调被丢弃
                    Err(_) => {
                        println!("{}", serde_json::to_string_pretty(&state.synchronizer.status())?);
                        anyhow::bail!("同步已中止");
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("收到中断信号");
                }
            }
        }
        "index" => {
            let index = state.local.checksum_index().await?;
            println!("{}", serde_json::to_string_pretty(&index)?);
        }
        "status" => {
            state.synchronizer.reconcile().await?;
            println!("{}", serde_json::to_string_pretty(&state.synchronizer.status())?);
        }
        other => anyhow::bail!("未知命令: {}\n{}", other, USAGE),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = std::env::args().nth(1).unwrap_or_else(|| "sync".to_string());

    let config_dir = app_config_dir();
    std::fs::create_dir_all(&config_dir)?;
    init_logging(&config_dir);

    let state = AppState::new(config_dir).await?;

    let result = run(&state, &command).await;
    state.cleanup().await;
    result
}
