//! moluni: submit molecular calculations and reconcile their results.

use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

fn resolve_data_dir() -> PathBuf {
    std::env::var("MOLUNI_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn print_help() {
    println!("moluni: molecular calculation job orchestrator");
    println!();
    println!("Usage: moluni <command>");
    println!();
    println!("Commands:");
    println!("  submit <file> [--batch-size N] [--calc-type dft|md]");
    println!("                           Submit one XYZ descriptor per line of <file>");
    println!("  reconcile [--recover]    Poll pending jobs and store finished results");
    println!("  report [property]        Summarise the job store");
    println!("  report --export <file>   Write completed jobs and properties as JSON");
    println!("  help                     Show this help message");
    println!();
    println!("Environment:");
    println!("  MOLUNI_DATA_DIR          Data directory (default: data)");
    println!("  MOLUNI_API_URL           Compute service endpoint");
    println!("  MOLUNI_API_KEY           Bearer token for the compute service");
    println!("  RUST_LOG                 Log filter (default: info)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "--help" | "-h" | "help") {
        print_help();
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());
    let config = moluni_core::MoluniConfig::from_env(&data_dir)?;

    match command.as_str() {
        "submit" => {
            let submit_args = match commands::parse_submit_args(&args[2..]) {
                Ok(a) => a,
                Err(e) => {
                    eprintln!("{}", e);
                    eprintln!("Usage: moluni submit <file> [--batch-size N] [--calc-type dft|md]");
                    std::process::exit(1);
                }
            };
            let report = commands::submit(&config, &submit_args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "reconcile" => {
            let recover = args[2..].iter().any(|a| a == "--recover");
            let report = commands::reconcile(&config, recover).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "report" if args.get(2).map(String::as_str) == Some("--export") => {
            let Some(file) = args.get(3) else {
                eprintln!("Usage: moluni report --export <file>");
                std::process::exit(1);
            };
            let count = commands::export(&config, Path::new(file))?;
            println!("Exported {} calculations to {}", count, file);
        }
        "report" => {
            let report = commands::report(&config, args.get(2).map(String::as_str))?;
            commands::print_report(&report);
        }
        other => {
            eprintln!("Unknown command: {}. Use 'moluni help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
