use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::gallery::read_manifest;
use rollcall_core::ledger::TIMESTAMP_FORMAT;
use rollcall_core::{AttendanceRecord, IdentityMeta};
use rollcall_hw::Camera;
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera and start taking attendance
    Start,
    /// Stop the camera and clear the session (the ledger is kept)
    Stop,
    /// Hide the live preview; recognition continues
    Pause,
    /// Show the live preview again
    Resume,
    /// Show pipeline state, counters and the last error
    Status,
    /// Show present/absent/unknown counts for the current session
    Summary,
    /// Print every attendance ledger row
    Ledger,
    /// Write the session summary and every ledger row to a CSV file
    Export {
        /// Output file (default: attendance_export_<timestamp>.csv)
        path: Option<PathBuf>,
    },
    /// Save the latest annotated frame as PNG
    Snapshot {
        /// Output file (.png)
        path: PathBuf,
    },
    /// List V4L2 capture devices (does not need the daemon)
    Devices,
    /// Validate a gallery manifest (does not need the daemon)
    Gallery {
        /// Path to gallery.json
        manifest: PathBuf,
    },
}

// D-Bus proxy for the daemon's control interface.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn start(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<String>;
    async fn pause(&self) -> zbus::Result<String>;
    async fn resume(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn summary(&self) -> zbus::Result<String>;
    async fn ledger(&self) -> zbus::Result<String>;
    async fn save_snapshot(&self, path: &str) -> zbus::Result<String>;
}

async fn proxy() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

#[derive(Debug, Deserialize)]
struct Attendee {
    name: String,
    #[serde(flatten)]
    meta: IdentityMeta,
}

#[derive(Debug, Deserialize)]
struct Summary {
    total: usize,
    present: usize,
    absent: usize,
    unknown: usize,
    #[serde(default)]
    attendees: Vec<Attendee>,
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon sent invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn timestamp(record: &AttendanceRecord) -> String {
    record
        .timestamp
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn print_ledger(raw: &str) -> Result<()> {
    let rows: Vec<AttendanceRecord> = serde_json::from_str(raw).context("daemon sent invalid JSON")?;
    if rows.is_empty() {
        println!("No attendance recorded");
        return Ok(());
    }
    println!("{:<32} Timestamp", "Name");
    for row in &rows {
        let ts = timestamp(row);
        println!("{:<32} {}", row.name, if ts.is_empty() { "-" } else { ts.as_str() });
    }
    Ok(())
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Summary, present roster and ledger rows as one CSV document.
fn render_export(summary: &Summary, rows: &[AttendanceRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== ATTENDANCE SUMMARY ===");
    let _ = writeln!(out, "Total,Present,Absent,Unknown");
    let _ = writeln!(
        out,
        "{},{},{},{}",
        summary.total, summary.present, summary.absent, summary.unknown
    );

    let _ = writeln!(out, "\n=== PRESENT THIS SESSION ===");
    let _ = writeln!(out, "Name,Student ID,Course,Year,Section");
    for attendee in &summary.attendees {
        let meta = &attendee.meta;
        let cells = [
            Some(attendee.name.as_str()),
            meta.student_id.as_deref(),
            meta.course.as_deref(),
            meta.year.as_deref(),
            meta.section.as_deref(),
        ];
        let line: Vec<String> = cells.iter().map(|c| csv_field(c.unwrap_or(""))).collect();
        let _ = writeln!(out, "{}", line.join(","));
    }

    let _ = writeln!(out, "\n=== DETAILED ATTENDANCE ===");
    let _ = writeln!(out, "{}", rollcall_core::ledger::LEDGER_HEADER);
    for row in rows {
        let _ = writeln!(out, "{},{}", csv_field(&row.name), timestamp(row));
    }
    out
}

async fn export(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("attendance_export_{stamp}.csv"))
    });

    let daemon = proxy().await?;
    let summary: Summary =
        serde_json::from_str(&daemon.summary().await?).context("daemon sent invalid JSON")?;
    let rows: Vec<AttendanceRecord> =
        serde_json::from_str(&daemon.ledger().await?).context("daemon sent invalid JSON")?;

    std::fs::write(&path, render_export(&summary, &rows))
        .with_context(|| format!("cannot write {}", path.display()))?;
    println!("Attendance exported to {}", path.display());
    Ok(())
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}

fn check_gallery(manifest: &Path) -> Result<()> {
    let entries = read_manifest(manifest)?;
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));
    let mut missing = 0usize;

    for entry in &entries {
        let present = entry.images.iter().filter(|p| base.join(p).is_file()).count();
        missing += entry.images.len() - present;
        println!("{:<32} {present}/{} images", entry.name.trim(), entry.images.len());
        for image in entry.images.iter().filter(|p| !base.join(p).is_file()) {
            println!("  missing: {}", image.display());
        }
    }

    println!("{} identities, {missing} missing images", entries.len());
    if missing > 0 {
        anyhow::bail!("gallery manifest references missing images");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => println!("{}", proxy().await?.start().await?),
        Commands::Stop => println!("{}", proxy().await?.stop().await?),
        Commands::Pause => println!("{}", proxy().await?.pause().await?),
        Commands::Resume => println!("{}", proxy().await?.resume().await?),
        Commands::Status => print_json(&proxy().await?.status().await?)?,
        Commands::Summary => print_json(&proxy().await?.summary().await?)?,
        Commands::Ledger => print_ledger(&proxy().await?.ledger().await?)?,
        Commands::Export { path } => export(path).await?,
        Commands::Snapshot { path } => {
            // The daemon resolves paths in its own working directory.
            let path = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()?.join(path)
            };
            let saved = proxy()
                .await?
                .save_snapshot(&path.to_string_lossy())
                .await?;
            println!("Snapshot saved to {saved}");
        }
        Commands::Devices => list_devices(),
        Commands::Gallery { manifest } => check_gallery(&manifest)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_export() {
        let summary: Summary = serde_json::from_str(
            r#"{"total": 3, "present": 2, "absent": 1, "unknown": 4,
                "attendees": [
                    {"name": "ANA", "student_id": "2021-0042", "course": "BSCS", "year": "3", "section": "A"},
                    {"name": "DELA CRUZ, JUAN"}
                ]}"#,
        )
        .unwrap();
        let rows: Vec<AttendanceRecord> = serde_json::from_str(
            r#"[{"name": "ANA", "timestamp": "2024-05-01T08:00:00"},
                {"name": "BEN", "timestamp": null}]"#,
        )
        .unwrap();

        let csv = render_export(&summary, &rows);
        let expected = "\
=== ATTENDANCE SUMMARY ===
Total,Present,Absent,Unknown
3,2,1,4

=== PRESENT THIS SESSION ===
Name,Student ID,Course,Year,Section
ANA,2021-0042,BSCS,3,A
\"DELA CRUZ, JUAN\",,,,

=== DETAILED ATTENDANCE ===
Name,Timestamp
ANA,2024-05-01 08:00:00
BEN,
";
        assert_eq!(csv, expected);
    }
}
