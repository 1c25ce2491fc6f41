//! Serve command implementation.

use std::time::Duration;

use colored::Colorize;
use huddle_core::{CollaborativeServer, HuddleConfig};
use tracing::info;

use super::status::print_status;

/// Execute the serve command.
///
/// Runs until Ctrl-C, or for `duration_secs` when given, then stops the
/// server and prints its final status.
pub async fn execute(
    config: HuddleConfig,
    duration_secs: Option<u64>,
    json_output: bool,
) -> anyhow::Result<()> {
    let server = CollaborativeServer::new(config);
    server.start()?;

    if !json_output {
        println!(
            "{} {}:{} ({})",
            "Huddle server running on".green(),
            server.config().server.host,
            server.config().server.port,
            server.server_id().dimmed()
        );
        println!("{}", "Press Ctrl-C to stop".dimmed());
    }

    match duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }
    info!("Shutdown requested");

    let mut status = server.status()?;
    server.stop()?;
    status.state = server.state()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!();
        print_status(&status);
    }
    Ok(())
}
