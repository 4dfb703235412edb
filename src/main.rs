use std::path::PathBuf;
use std::sync::Arc;

use dropvoice::effects::LiveEffectRunner;
use dropvoice::widget::Widget;
use dropvoice::{settings, spawn_state_loop};

fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(dir).join("dropvoice");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("dropvoice")
}

#[tokio::main]
async fn main() {
    // Load .env file if present (for GEMINI_API_KEY)
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = settings::load_settings(&config_dir());
    log::info!(
        "Starting voice widget (voice={}, screen={})",
        settings.voice_name,
        settings.screen
    );

    let api_key = match settings::api_key_from_env() {
        Some(key) => key,
        None => {
            log::error!("GEMINI_API_KEY is not set; cannot open voice sessions");
            std::process::exit(1);
        }
    };

    let mut widget = Widget::new(settings.screen.clone());
    widget.toggle_panel();

    let runner = LiveEffectRunner::new(api_key, settings.voice_name.clone());
    let handle = spawn_state_loop(runner);

    // Print widget snapshots as the session progresses
    let mut status_rx = handle.subscribe();
    let widget_for_log = widget.clone();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            log::info!("Widget: {:?} (screen={})", status, widget_for_log.screen());
        }
    });

    handle.start(widget.screen().to_string()).await;
    log::info!("Session starting; press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to wait for shutdown signal: {}", e);
    }

    log::info!("Shutting down");
    handle.stop().await;

    // Give teardown a moment to release the devices cleanly
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
}
