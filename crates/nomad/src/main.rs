use clap::Parser;
use console::style;

use nomad::cli::{dispatch, Cli};
use nomad::logging;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    logging::init();
    console::set_colors_enabled(logging::colors_enabled());

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => {}
        Err(err) => {
            match err.origin_prefix() {
                Some(origin) => eprintln!("{} {origin} - {err}", style("error").red().bold()),
                None => eprintln!("{} {err}", style("error").red().bold()),
            }
            std::process::exit(err.exit_code());
        }
    }
}
