//! Human-readable rendering of a server status snapshot.

use colored::Colorize;
use huddle_core::monitoring::HealthStatus;
use huddle_core::{ServerState, ServerStatus};

pub fn print_status(status: &ServerStatus) {
    println!("{}", "Huddle Server".bold().cyan());
    println!();

    let state = match status.state {
        ServerState::Running => status.state.to_string().green(),
        ServerState::Error => status.state.to_string().red(),
        _ => status.state.to_string().yellow(),
    };
    println!("  Server:  {}", status.server_id.dimmed());
    println!("  State:   {}", state);
    println!("  Address: {}:{}", status.config.host, status.config.port);
    println!("  Uptime:  {:.1}s", status.uptime_seconds);
    println!();

    println!("{}", "Activity:".bold());
    let stats = &status.statistics;
    println!("  Workers registered: {}", stats.workers_registered.to_string().green());
    println!("  Messages routed:    {}", stats.messages_routed.to_string().green());
    println!("  Spaces created:     {}", stats.spaces_created.to_string().green());
    println!(
        "  Active workers:     {} / {}",
        status.active_workers, status.config.max_workers
    );
    println!("  Open spaces:        {}", status.collaborative_spaces);
    println!();

    if let Some(health) = &status.recovery {
        println!("{}", "Recovery:".bold());
        let pct = format!("{:.0}%", health.overall_health_pct);
        let pct = if health.overall_health_pct >= 80.0 { pct.green() } else { pct.red() };
        println!("  Component health: {}", pct);
        println!(
            "  Failures:         {} total, {} resolved",
            health.total_failures, health.resolved_failures
        );
        if health.queued_tasks > 0 {
            println!("  Queued tasks:     {}", health.queued_tasks.to_string().yellow());
        }
        println!();
    }

    if let Some(overview) = &status.monitoring {
        println!("{}", "Monitoring:".bold());
        let label = match overview.status {
            HealthStatus::Healthy => "healthy".green(),
            HealthStatus::Degraded => "degraded".red(),
        };
        println!("  Status:          {}", label);
        println!("  Active alerts:   {}", overview.active_alerts);
        println!("  Recommendations: {}", overview.pending_recommendations);
        println!("  Metrics tracked: {}", overview.total_metrics);
    }
}
