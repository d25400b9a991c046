use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

mod api;
mod cli;
mod config;
mod error;
mod metrics;
mod models;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use cli::CommandArgs;
use config::{SupervisorConfig, POLLER_JOIN_TIMEOUT};
use services::persistence::read_import_file;
use services::{EventLog, Poller, Supervisor};
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let config = SupervisorConfig::from_args(&args).context("failed to resolve configuration")?;
    config
        .ensure_managed_dir()
        .with_context(|| format!("cannot prepare '{}'", config.managed_dir.display()))?;
    let config = Arc::new(config);

    let events = EventLog::new(config.log_path.clone());
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&config), events));

    log::info!(
        "🔄 Capabilities: resource probe {}, process tree {}",
        enabled(config.capabilities.resource_probe),
        enabled(config.capabilities.process_tree)
    );
    if !supervisor.artifacts().template_exists() {
        log::warn!("❌ Template executable not found at '{}'", config.template_path.display());
        log::warn!("   Entries cannot be started until it is in place");
    }

    // 配置文件缺失时从空集合开始；格式错误时记录并继续
    match supervisor.load_from(&config.snapshot_path).await {
        Ok(Some(summary)) => {
            log::info!("✅ Loaded {} entries", summary.loaded);
            log::debug!("Entries: {:?}", supervisor.names().await);
        }
        Ok(None) => log::info!("No configuration file, starting with zero entries"),
        Err(e) => log::error!("Failed to load configuration: {}", e),
    }

    if let Some(path) = &args.import {
        let text = read_import_file(path).with_context(|| format!("cannot import '{}'", path.display()))?;
        let summary = supervisor.import_names(&text).await;
        log::info!(
            "Imported {} names ({} skipped, {} rejected)",
            summary.added,
            summary.skipped,
            summary.rejected
        );
    }

    let poller = Poller::spawn(Arc::clone(&supervisor), config.poll_interval, config.poll_backoff);
    let state = new_state(Arc::clone(&supervisor)).context("failed to register metrics")?;

    print_banner(&args, &supervisor);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(api::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("cannot bind {}", bind_address))?
    .run();

    let served = server.await;

    log::info!("Shutting down...");
    poller.shutdown(POLLER_JOIN_TIMEOUT).await;
    supervisor.shutdown().await;

    served.context("HTTP server failed")
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn print_banner(args: &CommandArgs, supervisor: &Supervisor) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Process Supervisor v{:<33}║", env!("CARGO_PKG_VERSION"));
    println!("║      Template-based Dynamic Process Manager               ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!("📁 Managed directory: {}", supervisor.artifacts().managed_dir().display());
    println!("📄 Template: {}", supervisor.artifacts().template_path().display());
    if let Some(log_file) = supervisor.events().file() {
        println!("📝 Log file: {}", log_file.display());
    }
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/entries                  - List entries");
    println!("  POST   /api/entries                  - Add an entry");
    println!("  DELETE /api/entries/{{name}}           - Stop, clean up and remove an entry");
    println!("  POST   /api/entries/{{name}}/start     - Start an entry");
    println!("  POST   /api/entries/{{name}}/stop      - Stop an entry");
    println!("  POST   /api/batch/{{start|stop|delete}} - Batch operation");
    println!("  POST   /api/config/save              - Save configuration");
    println!("  POST   /api/config/load              - Reload configuration");
    println!("  POST   /api/import                   - Import names (one per line)");
    println!("  GET    /api/logs                     - Recent log lines");
    println!("  GET    /metrics                      - Prometheus metrics");
    println!("  GET    /health                       - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
