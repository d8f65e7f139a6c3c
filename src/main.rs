use clap::Parser as _;
use nspanelpro_bridge::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_VARIABLE: &str = "NSPANELPRO_BRIDGE_LOG";

#[derive(clap::Parser)]
#[clap(version, about)]
enum Commands {
    Bridge(commands::bridge::Args),
    PublishState(commands::publish_state::Args),
    SendConfig(commands::send_config::Args),
    Topics(commands::topics::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description = std::env::var(LOG_VARIABLE).unwrap_or_else(|_| "info".to_string());
    let filter = match filter_description.parse::<tracing_subscriber::filter::targets::Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("error: {LOG_VARIABLE} is not a valid filter: {e}");
            std::process::exit(2);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Bridge(args) => end(commands::bridge::run(args)),
        Commands::PublishState(args) => end(commands::publish_state::run(args)),
        Commands::SendConfig(args) => end(commands::send_config::run(args)),
        Commands::Topics(args) => end(commands::topics::run(args)),
    }
}
