mod args;
mod process;
mod state;
mod version;

use args::Args;
use clap::Parser;
use state::AppState;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let state = match AppState::load(&args) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = process::run(state).await {
        tracing::error!("aurora exited with error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(3);
    }
}
