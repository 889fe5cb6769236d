use crate::{CameraArgs, CameraCommands, Commands, RecipientCommands, RuleCommands, StreamCommands};
use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;
use tracing::debug;
use vigil_core::api::{BackendClient, CameraConfig, Health, NewRule, Rule, SourceType, StatusReply};
use vigil_core::{Alert, DetectionCounts, ObjectType};

pub async fn run(client: &BackendClient, command: Commands, json: bool) -> Result<()> {
    debug!(event = "cli_command", api_url = %client.base_url(), command = ?command);
    match command {
        Commands::Camera { action } => match action {
            CameraCommands::Configure(args) => {
                let config = camera_config(args)?;
                let reply = client
                    .configure_camera(&config)
                    .await
                    .context("Failed to configure camera")?;
                print_reply(&reply, "Camera configured", json)
            }
            CameraCommands::Test(args) => {
                let config = camera_config(args)?;
                let reply = client
                    .test_connection(&config)
                    .await
                    .context("Camera connection test failed")?;
                print_reply(&reply, "Camera reachable", json)
            }
        },
        Commands::Stream { action } => match action {
            StreamCommands::Start => {
                let reply = client
                    .start_stream()
                    .await
                    .context("Failed to start stream")?;
                print_reply(&reply, "Stream started", json)
            }
            StreamCommands::Stop => {
                let reply = client
                    .stop_stream()
                    .await
                    .context("Failed to stop stream")?;
                print_reply(&reply, "Stream stopped", json)
            }
        },
        Commands::Rules { action } => match action {
            RuleCommands::List => {
                let rules = client.rules().await.context("Failed to fetch rules")?;
                if json {
                    return print_json(&rules);
                }
                if rules.is_empty() {
                    println!("No rules configured");
                }
                for rule in &rules {
                    println!("{}", format_rule(rule));
                }
                Ok(())
            }
            RuleCommands::Create {
                name,
                object,
                threshold,
            } => {
                let rule = new_rule(name, object, threshold)?;
                let reply = client
                    .create_rule(&rule)
                    .await
                    .context("Failed to create rule")?;
                let fallback = match reply.rule_id.as_deref() {
                    Some(id) => format!("Rule created: {id}"),
                    None => "Rule created".to_string(),
                };
                print_reply(&reply, &fallback, json)
            }
            RuleCommands::Delete { rule_id } => {
                let reply = client
                    .delete_rule(&rule_id)
                    .await
                    .with_context(|| format!("Failed to delete rule {rule_id}"))?;
                print_reply(&reply, "Rule deleted", json)
            }
        },
        Commands::Recipients { action } => match action {
            RecipientCommands::Set { emails } => {
                let emails = clean_emails(emails)?;
                let reply = client
                    .configure_alerts(&emails)
                    .await
                    .context("Failed to configure alert recipients")?;
                print_reply(&reply, "Recipients updated", json)
            }
            RecipientCommands::Test { emails } => {
                let emails = clean_emails(emails)?;
                let reply = client
                    .send_test_email(&emails)
                    .await
                    .context("Failed to send test email")?;
                print_reply(&reply, "Test email sent", json)
            }
        },
        Commands::Alerts { limit } => {
            let alerts = client
                .alerts(limit)
                .await
                .context("Failed to fetch alerts")?;
            if json {
                return print_json(&alerts);
            }
            println!("Recent Alerts ({})", alerts.len());
            if alerts.is_empty() {
                println!("No alerts yet");
            }
            for alert in &alerts {
                println!("{}", format_alert(alert));
            }
            Ok(())
        }
        Commands::Detections => {
            let counts = client
                .detections()
                .await
                .context("Failed to fetch detections")?;
            if json {
                return print_json(&counts);
            }
            println!("{}", format_counts(&counts));
            Ok(())
        }
        Commands::Health => {
            let health = client.health().await.context("Failed to fetch health")?;
            if json {
                return print_json(&health);
            }
            println!("{}", format_health(&health));
            Ok(())
        }
    }
}

fn camera_config(args: CameraArgs) -> Result<CameraConfig> {
    match args.source {
        SourceType::Rtsp if args.rtsp_url.as_deref().map_or(true, str::is_empty) => {
            bail!("--rtsp-url is required for rtsp sources")
        }
        SourceType::Upload if args.video_file.as_deref().map_or(true, str::is_empty) => {
            bail!("--video-file is required for upload sources")
        }
        _ => {}
    }
    Ok(CameraConfig {
        source_type: args.source,
        rtsp_url: args.rtsp_url,
        video_file: args.video_file,
    })
}

/// The backend fires a rule once the count exceeds `threshold`, so 0 means
/// "any detection".
fn new_rule(name: String, object_type: ObjectType, threshold: u32) -> Result<NewRule> {
    let name = name.trim().to_string();
    if name.is_empty() {
        bail!("Rule name must not be empty");
    }
    Ok(NewRule {
        name,
        object_type,
        threshold,
    })
}

fn clean_emails(emails: Vec<String>) -> Result<Vec<String>> {
    let cleaned: Vec<String> = emails
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(bad) = cleaned.iter().find(|email| !email.contains('@')) {
        bail!("Not an email address: {bad}");
    }
    if cleaned.is_empty() {
        bail!("At least one email address is required");
    }
    Ok(cleaned)
}

fn print_reply(reply: &StatusReply, fallback: &str, json: bool) -> Result<()> {
    if json {
        return print_json(reply);
    }
    println!("{}", reply.message.as_deref().unwrap_or(fallback));
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{text}");
    Ok(())
}

fn format_rule(rule: &Rule) -> String {
    format!(
        "- [{}] {}: {} > {}",
        rule.rule_id, rule.name, rule.object_type, rule.threshold
    )
}

fn format_alert(alert: &Alert) -> String {
    format!(
        "{}  {}  {}",
        alert.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        alert.rule_name,
        alert.summary()
    )
}

fn format_counts(counts: &DetectionCounts) -> String {
    format!(
        "Persons: {} | Animals: {} | Vehicles: {}",
        counts.person, counts.animal, counts.vehicle
    )
}

fn format_health(health: &Health) -> String {
    format!(
        "{} | streaming: {} | clients: {} | {}",
        health.status,
        if health.streaming { "yes" } else { "no" },
        health.connected_clients,
        format_counts(&health.detections)
    )
}
