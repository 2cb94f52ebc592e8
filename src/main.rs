mod app;
mod export;
mod gui;
mod io;
mod map;
mod remote;
mod timeline;
mod tree;
mod ui;

use app::{AppConfig, PhylomapApp};
use clap::Parser;

fn main() {
    let _ = env_logger::builder().format_timestamp(None).try_init();

    let config = AppConfig::parse();
    if let Err(err) = PhylomapApp::run(&config) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
