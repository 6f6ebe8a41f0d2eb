mod commands;
mod completion;
mod config;
mod connection;
mod editor;
mod error;
mod files;
mod history;
mod processor;
mod quotes;
mod registry;
mod render;
mod timer;
mod transport;
mod ui;
mod wildcard;

use std::fs;
use std::sync::Mutex;

use clap::Parser;
use directories::ProjectDirs;
use tracing_subscriber::EnvFilter;

use config::{Args, Settings};

/// Logs go to `wscmd.log` in the data directory; the terminal belongs to the
/// console. `WSCMD_LOG` overrides the filter.
fn init_logging(debug: bool) {
    let Some(dirs) = ProjectDirs::from("", "", "wscmd") else {
        return;
    };
    let dir = dirs.data_local_dir();
    if fs::create_dir_all(dir).is_err() {
        return;
    }
    let Ok(file) = fs::File::options().create(true).append(true).open(dir.join("wscmd.log")) else {
        return;
    };
    let default = if debug { "wscmd=debug" } else { "wscmd=info" };
    let filter = EnvFilter::try_from_env("WSCMD_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);
    let settings = Settings::from_args(args, &Settings::working_dir()?);
    tracing::info!(urls = settings.urls.len(), "starting");
    ui::run(settings).await
}
