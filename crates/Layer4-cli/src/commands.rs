//! Operator commands - 플러그인 런타임 운영 명령

use crate::output::{format_optional_time, format_time, print_json, truncate, OutputMode, Table};
use gamepanel_core::{BootReport, PluginManager};
use gamepanel_foundation::{Actor, AuditQuery, AuditRecord, PluginRecord};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Scan
// ============================================================================

/// 부팅 결과 출력 (발견/등록/제외/Faulted)
pub fn print_boot_report(report: &BootReport, mode: OutputMode) -> anyhow::Result<()> {
    if mode.is_json() {
        return print_json(&json!({
            "discovered": report.discovery.names(),
            "registered": report.registered,
            "updated": report.updated,
            "loadFailures": report.discovery.failures.iter().map(|f| json!({
                "path": f.path,
                "error": f.error.to_string(),
            })).collect::<Vec<_>>(),
            "rejected": report.discovery.rejected.iter().map(|r| json!({
                "plugin": r.name,
                "path": r.path,
                "error": r.error.to_string(),
            })).collect::<Vec<_>>(),
            "registrationFailures": report.registration_failures.iter().map(|(name, e)| json!({
                "plugin": name,
                "error": e.to_string(),
            })).collect::<Vec<_>>(),
            "faulted": report.faulted.iter().map(|(name, reason)| json!({
                "plugin": name,
                "reason": reason,
            })).collect::<Vec<_>>(),
            "contributions": report.collection.total(),
        }));
    }

    println!(
        "Discovered {} plugin(s): {} new, {} updated",
        report.discovery.plugins.len(),
        report.registered.len(),
        report.updated.len()
    );
    for failure in &report.discovery.failures {
        println!("  ✗ {}: {}", failure.path.display(), failure.error);
    }
    for rejected in &report.discovery.rejected {
        println!("  ✗ {} ({}): {}", rejected.name, rejected.path.display(), rejected.error);
    }
    for (name, error) in &report.registration_failures {
        println!("  ✗ {}: {}", name, error);
    }
    for (name, reason) in &report.faulted {
        println!("  ! {} faulted: {}", name, reason);
    }
    Ok(())
}

// ============================================================================
// List / Status
// ============================================================================

pub fn list(manager: &PluginManager, mode: OutputMode) -> anyhow::Result<()> {
    let records = manager.list()?;
    if mode.is_json() {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No plugins found under {}", manager.config().plugin_root.display());
        return Ok(());
    }

    let mut table = Table::new(vec!["NAME", "VERSION", "STATE", "ENABLED AT", "FAULT"]);
    for record in &records {
        table.row(record_row(record));
    }
    table.print();
    Ok(())
}

fn record_row(record: &PluginRecord) -> Vec<String> {
    vec![
        record.name.clone(),
        record.version.clone(),
        record.state.to_string(),
        format_optional_time(record.enabled_at.as_ref()),
        record
            .fault_reason
            .as_deref()
            .map(|reason| truncate(reason, 48))
            .unwrap_or_else(|| "-".to_string()),
    ]
}

pub fn status(manager: &PluginManager, name: &str, mode: OutputMode) -> anyhow::Result<()> {
    let status = manager.status(name)?;
    if mode.is_json() {
        return print_json(&status);
    }

    let record = &status.record;
    println!("{} {}", record.name, record.version);
    println!("  state:         {}", record.state);
    println!("  path:          {}", record.path.display());
    println!("  discovered:    {}", format_time(&record.discovered_at));
    println!("  enabled:       {}", format_optional_time(record.enabled_at.as_ref()));
    if let Some(reason) = &record.fault_reason {
        println!("  fault reason:  {}", reason);
    }

    let capabilities: Vec<&str> = status.capabilities.iter().map(|c| c.as_str()).collect();
    println!("  capabilities:  {}", capabilities.join(", "));

    let counts = &status.contributions;
    println!(
        "  contributions: {} routes, {} commands, {} cron, {} widgets, {} tabs",
        counts.routes, counts.commands, counts.cron, counts.widgets, counts.tabs
    );

    match &status.health {
        Some(health) => println!(
            "  health:        {}% ({} consecutive failures, checked {})",
            health.result.health_percentage,
            health.consecutive_failures,
            format_time(&health.checked_at)
        ),
        None => println!("  health:        not checked"),
    }
    Ok(())
}

pub fn summary(manager: &PluginManager, mode: OutputMode) -> anyhow::Result<()> {
    let summary = manager.summary()?;
    if mode.is_json() {
        return print_json(&summary);
    }

    println!("{} plugin(s)", summary.total);
    for (state, count) in &summary.by_state {
        println!("  {:<12} {}", state.as_str(), count);
    }
    println!("{} contribution(s)", summary.contributions.total());
    if summary.audit_failed_writes > 0 {
        println!("  ! {} audit write(s) failed", summary.audit_failed_writes);
    }
    Ok(())
}

// ============================================================================
// Enable / Disable
// ============================================================================

pub async fn enable(
    manager: &PluginManager,
    name: &str,
    actor: Actor,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let record = manager.enable(name, actor).await?;
    if mode.is_json() {
        return print_json(&record);
    }
    println!("✓ {} {} is {}", record.name, record.version, record.state);
    Ok(())
}

pub async fn disable(
    manager: &PluginManager,
    name: &str,
    cascade: bool,
    actor: Actor,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let disabled = manager.disable(name, cascade, actor).await?;
    if mode.is_json() {
        return print_json(&json!({ "disabled": disabled }));
    }

    if disabled.is_empty() {
        println!("{} is already disabled", name);
    } else {
        for plugin in &disabled {
            println!("✓ {} disabled", plugin);
        }
    }
    Ok(())
}

// ============================================================================
// Health
// ============================================================================

pub async fn health(manager: &PluginManager, mode: OutputMode) -> anyhow::Result<()> {
    let report = manager.run_health_checks().await;
    if mode.is_json() {
        return print_json(&report);
    }

    if report.results.is_empty() {
        println!("No enabled plugin registered a health check");
        return Ok(());
    }

    let mut table = Table::new(vec!["PLUGIN", "HEALTH", "FAILURES", "ERRORS"]);
    for (plugin, health) in &report.results {
        table.row(vec![
            plugin.clone(),
            format!("{}%", health.result.health_percentage),
            health.consecutive_failures.to_string(),
            truncate(&health.result.errors.join("; "), 60),
        ]);
    }
    table.print();

    println!(
        "\n{} healthy, {} unhealthy ({} ms)",
        report.healthy_count(),
        report.unhealthy_count(),
        report.duration_ms
    );
    for plugin in &report.faulted {
        println!("  ! {} faulted: health check threshold reached", plugin);
    }
    Ok(())
}

/// 주기 헬스 체크를 돌리며 Ctrl+C 를 기다린다
pub async fn watch(manager: &PluginManager) -> anyhow::Result<()> {
    let interval: Duration = manager.config().health_interval;
    println!(
        "Running health checks every {}s, press Ctrl+C to stop",
        interval.as_secs()
    );

    let handle = manager.spawn_health_checks();
    tokio::signal::ctrl_c().await?;
    handle.abort();

    tracing::info!("Health check loop stopped");
    Ok(())
}

// ============================================================================
// Order
// ============================================================================

pub fn order(manager: &PluginManager, mode: OutputMode) -> anyhow::Result<()> {
    let order = manager.activation_order()?;
    if mode.is_json() {
        return print_json(&order);
    }

    for (index, plugin) in order.iter().enumerate() {
        println!("{:>3}. {}", index + 1, plugin);
    }
    Ok(())
}

// ============================================================================
// Audit
// ============================================================================

pub async fn audit(
    manager: &PluginManager,
    plugin: Option<&str>,
    limit: usize,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let mut query = AuditQuery::new().with_limit(limit);
    if let Some(plugin) = plugin {
        query = query.with_plugin(plugin);
    }
    let records = manager.audit().query(&query).await?;

    if mode.is_json() {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No audit records");
        return Ok(());
    }

    let mut table = Table::new(vec!["TIME", "PLUGIN", "TRANSITION", "ACTOR", "REASON"]);
    for record in &records {
        table.row(audit_row(record));
    }
    table.print();
    Ok(())
}

fn audit_row(record: &AuditRecord) -> Vec<String> {
    vec![
        format_time(&record.timestamp),
        record.plugin.clone(),
        format!("{} → {}", record.from_state, record.to_state),
        record.actor.to_string(),
        record
            .reason
            .as_deref()
            .map(|reason| truncate(reason, 48))
            .unwrap_or_default(),
    ]
}

// ============================================================================
// Install
// ============================================================================

pub async fn install(manager: &PluginManager, source: &Path, mode: OutputMode) -> anyhow::Result<()> {
    let installed = manager.install(source).await?;
    if mode.is_json() {
        return print_json(&json!({
            "plugin": installed.manifest.name,
            "version": installed.manifest.version.to_string(),
            "path": installed.path,
            "files": installed.files,
            "bytes": installed.bytes,
        }));
    }

    println!(
        "✓ Installed {} {} ({} files, {} bytes) to {}",
        installed.manifest.name,
        installed.manifest.version,
        installed.files,
        installed.bytes,
        installed.path.display()
    );
    println!("Run 'gamepanel scan' to register it.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gamepanel_foundation::PluginState;
    use std::path::PathBuf;

    #[test]
    fn test_record_row() {
        let record = PluginRecord {
            name: "reports".to_string(),
            version: "1.0.0".to_string(),
            state: PluginState::Faulted,
            discovered_at: Utc::now(),
            enabled_at: None,
            fault_reason: Some("health_check_failed".to_string()),
            path: PathBuf::from("plugins/reports"),
            capabilities: Vec::new(),
        };

        assert_eq!(
            record_row(&record),
            vec!["reports", "1.0.0", "faulted", "-", "health_check_failed"]
        );
    }

    #[test]
    fn test_audit_row() {
        let record = AuditRecord::transition(
            "reports",
            PluginState::Enabled,
            PluginState::Disabled,
            Actor::user("12"),
        )
        .with_reason("cascade: core-analytics disabled");

        let row = audit_row(&record);
        assert_eq!(row[1], "reports");
        assert_eq!(row[2], "enabled → disabled");
        assert_eq!(row[3], "user:12");
        assert_eq!(row[4], "cascade: core-analytics disabled");
    }
}
