use anyhow::{bail, Context, Result};
use api::models::HealthResponse;
use colored::*;

/// Query `<url>/api/v1/health` and print the result.
///
/// Fails when the server cannot be reached or reports itself unhealthy.
pub async fn execute(url: &str, format: &str) -> Result<()> {
    let endpoint = format!("{}/api/v1/health", url.trim_end_matches('/'));
    let response = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("API server is not reachable at {}", url))?;
    let status = response.status();
    let health: HealthResponse = response
        .json()
        .await
        .with_context(|| format!("Unexpected health response from {}", endpoint))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&health)?),
        _ => print_health_text(url, &health),
    }

    if !status.is_success() {
        bail!("server reported status {}", status);
    }
    Ok(())
}

fn print_health_text(url: &str, health: &HealthResponse) {
    println!("{}", "=== Keystone Health Check ===".bold());
    println!();

    let status_display = match health.status.as_str() {
        "healthy" => "HEALTHY".green().bold(),
        "degraded" => "DEGRADED".yellow().bold(),
        _ => health.status.to_uppercase().red().bold(),
    };
    println!("Server:    {}", url);
    println!("Status:    {}", status_display);
    println!("Version:   {}", health.version);
    println!("Timestamp: {}", health.timestamp.to_rfc3339());

    let (icon, text) = if health.database.connected {
        ("✓".green(), "connected".green())
    } else {
        ("✗".red(), "disconnected".red())
    };
    println!("{} DATABASE ({})", icon, text);
    println!("  {}", health.database.message);
}
