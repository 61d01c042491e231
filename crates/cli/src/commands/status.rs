//! Commands that read a running daemon's API

use anyhow::Result;
use colored::Colorize;
use fleetscale_lib::{
    health::ComponentStatus, models::DeploymentRecord, scaling::ControllerPhase,
};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_percent, color_status, format_percent, format_timestamp, print_info, print_json,
    print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Observed")]
    observed: String,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn status_name(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

fn print_deployment(label: &str, record: &DeploymentRecord) {
    println!(
        "{:<20}{} ({}, {} polls, submitted {})",
        label,
        record.deployment_name.cyan(),
        color_status(&record.state.to_string()),
        record.polls,
        format_timestamp(&record.submitted_at)
    );
}

/// Show the controller's phase, streak and deployments
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.status().await?;

    if format == OutputFormat::Json {
        return print_json(&snapshot);
    }

    println!("{}", "Controller Status".bold());
    println!("{}", "=".repeat(60));
    println!("{:<20}{}", "Resource group:", snapshot.resource_group.cyan());
    println!(
        "{:<20}{}",
        "Phase:",
        color_status(&snapshot.phase.to_string())
    );
    if let ControllerPhase::Halted { reason } = &snapshot.phase {
        println!("{:<20}{}", "Halt reason:", reason.red());
    }
    println!(
        "{:<20}{} / {} readings above {}",
        "Streak:",
        snapshot.streak,
        snapshot.trigger_count,
        format_percent(snapshot.threshold_percent)
    );
    println!("{:<20}{}", "Scale-ups:", snapshot.scale_ups);
    println!();

    match &snapshot.last_reading {
        Some(reading) => println!(
            "{:<20}{} over {} nodes at {}",
            "Last reading:",
            color_percent(reading.average_percent, snapshot.threshold_percent),
            reading.sample_count,
            format_timestamp(&reading.observed_at)
        ),
        None => print_info("No fleet reading yet"),
    }

    if let Some(record) = &snapshot.active_deployment {
        print_deployment("Active deployment:", record);
    }
    if let Some(record) = &snapshot.last_deployment {
        print_deployment("Last deployment:", record);
    }

    Ok(())
}

/// Show the per-node samples behind the last reading
pub async fn show_samples(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let mut samples = client.samples().await?;
    samples.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    match format {
        OutputFormat::Json => print_json(&samples),
        OutputFormat::Table => {
            let count = samples.len();
            let rows: Vec<SampleRow> = samples
                .into_iter()
                .map(|s| SampleRow {
                    node: s.node_id,
                    cpu: format_percent(s.cpu_percent),
                    observed: format_timestamp(&s.observed_at),
                })
                .collect();
            print_table(rows);
            if count > 0 {
                println!("\nTotal: {} nodes", count);
            }
            Ok(())
        }
    }
}

/// Show liveness and readiness of a daemon
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "health": health,
            "readiness": readiness,
        }));
    }

    println!(
        "{:<10}{}",
        "Health:",
        color_status(status_name(health.status))
    );
    if readiness.ready {
        println!("{:<10}{}", "Ready:", "yes".green());
    } else {
        println!("{:<10}{}", "Ready:", "no".red());
        if let Some(reason) = &readiness.reason {
            print_warning(reason);
        }
    }
    println!();

    let rows: Vec<ComponentRow> = health
        .components
        .into_iter()
        .map(|(name, component)| ComponentRow {
            name,
            status: color_status(status_name(component.status)),
            message: component.message.unwrap_or_default(),
        })
        .collect();
    print_table(rows);

    Ok(())
}
