use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use facemark_core::{AttendanceLedger, DetectionLoop, GalleryHandle, GalleryStore, MarkStatus};
use facemark_store::{EmployeeStatus, Store};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod extractor;
mod images;
mod source;

use config::Config;
use engine::{enroll_and_archive, spawn_engine, EngineHandle};
use extractor::CommandExtractor;
use images::EnrollmentImages;
use source::{load_frame, SingleFrame, SpoolSource};

#[derive(Parser)]
#[command(name = "facemark", about = "Face recognition attendance tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the spool directory and mark attendance; reads console commands on stdin
    Watch {
        /// Spool directory (overrides FACEMARK_SPOOL_DIR)
        #[arg(long)]
        spool: Option<PathBuf>,
        /// Write annotated copies of frames with recognised faces here
        #[arg(long)]
        annotate_dir: Option<PathBuf>,
    },
    /// Enroll a face image for an employee; the image is archived as {name}_{n}.jpg
    Enroll {
        /// Employee name; the gallery label gets the next free counter, e.g. "alice_2"
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        image: PathBuf,
    },
    /// Record attendance for an identity directly
    Mark {
        #[arg(short, long)]
        identity: String,
        /// Snapshot archived with the record
        #[arg(long)]
        image: PathBuf,
        /// Detection time, e.g. 2024-01-01T09:00:00 (defaults to now)
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },
    /// Manage the employee registry
    Employee {
        #[command(subcommand)]
        command: EmployeeCommands,
    },
    /// Inspect the embedding gallery
    Gallery {
        #[command(subcommand)]
        command: GalleryCommands,
    },
    /// Export a day's attendance report and snapshot images
    Export {
        /// Day to export, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        report_dir: Option<PathBuf>,
        #[arg(long)]
        image_dir: Option<PathBuf>,
    },
    /// Show configuration and counts
    Status,
}

#[derive(Subcommand)]
enum EmployeeCommands {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        contact: Option<String>,
    },
    List,
    /// Stop an employee from resolving for attendance
    Deactivate {
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum GalleryCommands {
    List,
    /// Enroll every archived image not yet in the gallery
    Sync {
        /// Enrollment image directory (overrides FACEMARK_IMAGES_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Watch {
            spool,
            annotate_dir,
        } => watch(&config, spool, annotate_dir).await?,
        Commands::Enroll { name, image } => {
            let frame =
                load_frame(&image).with_context(|| format!("reading {}", image.display()))?;
            let gallery = open_gallery(&config);
            let images = EnrollmentImages::new(&config.images_dir);
            let mut detection = DetectionLoop::new(
                SingleFrame::new(frame),
                command_extractor(&config)?,
                open_store(&config)?,
                gallery.clone(),
                config.loop_config(),
            );
            let report = enroll_and_archive(&mut detection, &images, &name)?;
            record_encodings(detection.ledger(), &gallery, &report.merge.added);
            print_json(&report)?;
        }
        Commands::Mark {
            identity,
            image,
            at,
        } => {
            let snapshot =
                std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let detected_at = at.unwrap_or_else(|| Local::now().naive_local());
            let mut store = open_store(&config)?;
            let status = MarkStatus::from(store.mark(&identity, &snapshot, detected_at));
            print_json(&json!({ "identity": identity, "status": status }))?;
        }
        Commands::Employee { command } => {
            let store = open_store(&config)?;
            match command {
                EmployeeCommands::Add { name, contact } => {
                    let id = store.add_employee(&name, contact.as_deref())?;
                    print_json(&json!({ "id": id, "name": name }))?;
                }
                EmployeeCommands::List => print_json(&store.list_employees()?)?,
                EmployeeCommands::Deactivate { name } => {
                    if !store.set_employee_status(&name, EmployeeStatus::Inactive)? {
                        bail!("no employee named {name}");
                    }
                    println!("{name} deactivated");
                }
            }
        }
        Commands::Gallery { command } => match command {
            GalleryCommands::List => {
                let gallery = open_gallery(&config).snapshot();
                let entries: Vec<_> = gallery
                    .entries()
                    .iter()
                    .map(|e| json!({ "identity": e.identity, "dim": e.embedding.dim() }))
                    .collect();
                print_json(&entries)?;
            }
            GalleryCommands::Sync { dir } => {
                let dir = dir.unwrap_or_else(|| config.images_dir.clone());
                sync_gallery(&config, &EnrollmentImages::new(dir))?;
            }
        },
        Commands::Export {
            date,
            report_dir,
            image_dir,
        } => {
            let store = open_store(&config)?;
            let report_dir = report_dir.unwrap_or_else(|| config.export_dir.clone());
            let image_dir = image_dir.unwrap_or_else(|| config.download_dir.clone());
            let summary = store.export_day(date, &report_dir, &image_dir)?;
            print_json(&summary)?;
        }
        Commands::Status => {
            let store = open_store(&config)?;
            let today = Local::now().date_naive();
            print_json(&json!({
                "config": config,
                "gallery_entries": open_gallery(&config).snapshot().len(),
                "employees": store.list_employees()?.len(),
                "marked_today": store.attendance_on(today)?.len(),
            }))?;
        }
    }

    Ok(())
}

async fn watch(
    config: &Config,
    spool: Option<PathBuf>,
    annotate_dir: Option<PathBuf>,
) -> Result<()> {
    let spool = spool.unwrap_or_else(|| config.spool_dir.clone());
    std::fs::create_dir_all(&spool).with_context(|| format!("creating {}", spool.display()))?;
    if let Some(dir) = &annotate_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let gallery = open_gallery(config);
    let detection = DetectionLoop::new(
        SpoolSource::new(
            &spool,
            Duration::from_millis(config.poll_interval_ms),
            stop.clone(),
        ),
        command_extractor(config)?,
        open_store(config)?,
        gallery.clone(),
        config.loop_config(),
    );
    // Second connection for console-side writes; the engine thread owns the first.
    let console_store = open_store(config)?;
    let images = EnrollmentImages::new(&config.images_dir);

    let (engine, worker) = spawn_engine(detection, images, stop, annotate_dir)?;
    tracing::info!(
        spool = %spool.display(),
        entries = gallery.snapshot().len(),
        "facemark watching"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = engine.closed() => {
                tracing::warn!("engine stopped");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !console_command(&engine, &console_store, &gallery, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed; console disabled");
                    stdin_open = false;
                }
            },
        }
    }

    engine.shutdown();
    let summary = tokio::task::spawn_blocking(move || worker.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))??;
    tracing::info!(
        frames = summary.frames,
        faces = summary.faces,
        marked = summary.marked,
        "facemark stopped"
    );
    Ok(())
}

/// Run one operator console line. Returns false on `quit`.
async fn console_command(
    engine: &EngineHandle,
    store: &Store,
    gallery: &GalleryHandle,
    line: &str,
) -> bool {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("quit"), _) => return false,
        (Some("status"), _) => {
            if let Err(e) = print_json(&engine.status()) {
                tracing::warn!(error = %e, "failed to print status");
            }
        }
        (Some("enroll"), Some(name)) => {
            println!("enrolling {name} from the next frame...");
            match engine.enroll(name.to_string()).await {
                Ok(report) => {
                    record_encodings(store, gallery, &report.merge.added);
                    if let Err(e) = print_json(&report) {
                        tracing::warn!(error = %e, "failed to print enrollment report");
                    }
                }
                Err(e) => eprintln!("enroll failed: {e}"),
            }
        }
        _ => eprintln!("commands: enroll <name> | status | quit"),
    }
    true
}

/// Merge every archived enrollment image that is not in the gallery yet.
fn sync_gallery(config: &Config, images: &EnrollmentImages) -> Result<()> {
    let gallery = open_gallery(config);
    let pending = images.pending(&gallery.snapshot())?;

    let mut candidates = Vec::with_capacity(pending.len());
    let mut unreadable = Vec::new();
    for (label, path) in pending {
        match image::open(&path) {
            Ok(img) => candidates.push((label, img.to_rgb8())),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                unreadable.push(path);
            }
        }
    }

    let batch: Vec<(String, &image::RgbImage)> =
        candidates.iter().map(|(label, img)| (label.clone(), img)).collect();
    let report = gallery.merge(&command_extractor(config)?, &batch)?;
    record_encodings(&open_store(config)?, &gallery, &report.added);
    print_json(&json!({
        "dir": images.dir(),
        "merge": report,
        "unreadable": unreadable,
    }))
}

/// Copy newly enrolled embeddings onto the matching employee rows.
fn record_encodings(store: &Store, gallery: &GalleryHandle, added: &[String]) {
    let snapshot = gallery.snapshot();
    for label in added {
        let Some(entry) = snapshot.entries().iter().find(|e| &e.identity == label) else {
            continue;
        };
        match store.resolve_employee(label) {
            Ok(Some(employee)) => {
                if let Err(e) = store.set_employee_encoding(&employee.name, &entry.embedding) {
                    tracing::warn!(
                        name = %employee.name,
                        error = %e,
                        "failed to store employee encoding"
                    );
                }
            }
            Ok(None) => tracing::info!(label = %label, "enrolled label has no active employee"),
            Err(e) => tracing::warn!(error = %e, "employee lookup failed"),
        }
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path).with_context(|| format!("opening {}", config.db_path.display()))
}

fn open_gallery(config: &Config) -> Arc<GalleryHandle> {
    Arc::new(GalleryHandle::open(GalleryStore::new(&config.gallery_path)))
}

fn command_extractor(config: &Config) -> Result<CommandExtractor> {
    let program: &Path = config
        .extractor
        .as_deref()
        .context("FACEMARK_EXTRACTOR is not set; point it at a face extraction program")?;
    Ok(CommandExtractor::new(program))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
