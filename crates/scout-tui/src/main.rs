mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use scout_core::{ApiClient, Config, Theme, View};
use tracing::{info, warn};

use app::App;
use handler::handle_event;
use tui::EventHandler;

#[derive(Parser, Debug)]
#[command(name = "scout")]
#[command(version, about = "Terminal client for a streaming chat and research-agent backend")]
struct Cli {
    /// Backend base URL (overrides config and SCOUT_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// View to open with
    #[arg(long, value_parser = parse_view)]
    mode: Option<View>,

    /// Color theme
    #[arg(long, value_parser = parse_theme)]
    theme: Option<Theme>,

    /// Where to write logs (default: <config dir>/scout/scout.log)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_view(s: &str) -> Result<View, String> {
    View::parse(s).ok_or_else(|| format!("unknown mode '{s}' (expected chat or research)"))
}

fn parse_theme(s: &str) -> Result<Theme, String> {
    Theme::parse(s).ok_or_else(|| format!("unknown theme '{s}' (expected dark or light)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = match cli.log_file {
        Some(path) => path,
        None => logging::default_log_path()?,
    };
    logging::init_logging(&log_path)?;

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "could not load config, using defaults");
        let mut config = Config::new();
        config.apply_env();
        config
    });
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(theme) = cli.theme {
        config.theme = theme;
    }

    let client = ApiClient::new(&config.base_url)?
        .with_model(config.model.clone())
        .with_poll_policy(config.poll_policy());
    info!(base_url = client.base_url(), mode = config.mode.as_str(), "starting");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new();
    let mut app = App::new(&config, client, events.sender());
    if let Ok(path) = Config::get_config_path() {
        app = app.with_config_path(path);
    }
    app.check_health();
    if app.view == View::History {
        app.refresh_history();
    }

    let result = run(&mut terminal, &mut app, &mut events).await;

    app.cancel_active();
    tui::restore()?;
    info!("exiting");
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handle_event(app, event)?,
            None => break,
        }
    }
    Ok(())
}
