use std::process::ExitCode;
use std::sync::{Mutex, mpsc};

mod api;
mod controller;
mod domain;
mod inputter;
mod model;
mod pipeline;
mod ui;

use clap::Parser;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use api::ApiClient;
use controller::Controller;
use domain::{EvcConfig, EvcError, Message};
use model::{Model, Status};
use ui::ConsoleUI;

#[derive(Parser, Debug)]
#[command(
    name = "evc",
    version,
    about = "Terminal admin console for the event database REST service"
)]
struct Cli {
    /// Base URL of the backend service
    #[arg(default_value = "http://127.0.0.1:5000")]
    base_url: String,

    /// Write diagnostics to this file; stderr belongs to the UI
    #[arg(long)]
    log_file: Option<std::path::PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let result = run();
    ratatui::restore();
    match result {
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run() -> Result<(), EvcError> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    info!("Starting evc against {}", cli.base_url);

    let config = EvcConfig {
        base_url: cli.base_url.clone(),
        request_timeout: cli.timeout,
        ..EvcConfig::default()
    };

    let (tx, rx) = mpsc::channel();
    let api = ApiClient::new(&config, tx)?;
    let mut model = Model::init(&config, api);
    let ui = ConsoleUI::new(&config);
    let controller = Controller::new(&config);

    let mut terminal = ratatui::init();

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle key events and map to a Message
        if let Some(message) = controller.handle_event(&model)? {
            model.update(message)?;
        }

        // Deliver finished backend responses
        while let Ok(event) = rx.try_recv() {
            model.update(Message::Api(event))?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> Result<(), EvcError> {
    let Some(path) = &cli.log_file else {
        return Ok(());
    };
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("evc={level}")));
    let file = std::fs::File::create(path)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(ErrorLayer::default())
        .init();
    Ok(())
}
