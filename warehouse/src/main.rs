use clap::{Arg, Command};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("Warehouse Pipeline Manager")
        .version("1.0")
        .about("Builds the service-request star schema")
        .subcommand(
            Command::new("build")
                .about("Run the full star-schema build")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Sets a custom config file"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("build", build_matches)) => {
            let config_path = build_matches
                .get_one::<String>("config")
                .map(|s| s.as_str())
                .unwrap_or("config/warehouse.toml");
            println!("Starting warehouse build with config: {}", config_path);

            if let Err(e) = warehouse::run_warehouse_pipeline(config_path).await {
                eprintln!("Warehouse build error: {}", e);
                process::exit(1);
            }
        }
        _ => {
            println!("No subcommand specified. Use --help for usage information.");
            process::exit(1);
        }
    }
}
