//! CLI entrypoint for the FrankenMutex conformance harness.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use frankenmutex_core::MutexType;
use frankenmutex_harness::contract_matrix::{self, ALL_KINDS, MatrixTiming};
use frankenmutex_harness::fairness_probe::{FAIRNESS_BEAD, FairnessConfig, run_fairness_probe};
use frankenmutex_harness::structured_log::{
    ArtifactIndex, LogEmitter, LogEntry, LogLevel, StreamKind, validate_log_file,
};
use frankenmutex_membrane::config::{SafetyLevel, set_safety_level};

/// Conformance tooling for FrankenMutex.
#[derive(Debug, Parser)]
#[command(name = "frankenmutex-harness")]
#[command(about = "Conformance harness for the FrankenMutex pthread mutex family")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay the transition contract against the real mutex.
    ContractMatrix {
        /// Directory receiving the JSONL log, report, and artifact index.
        #[arg(long, default_value = "target/conformance")]
        output_dir: PathBuf,
        /// File stem for the emitted artifacts.
        #[arg(long, default_value = "pthread_mutex_contract_matrix")]
        stem: String,
        /// Run identifier embedded in trace ids.
        #[arg(long, default_value = "local")]
        run_id: String,
        /// Mutex kinds to replay (`normal`, `recursive`, `errorcheck`, `default`); all if omitted.
        #[arg(long = "kind")]
        kinds: Vec<String>,
        /// Runtime mode (`strict` or `hardened`).
        #[arg(long, default_value = "strict")]
        mode: String,
        /// How long the holder thread keeps the mutex in blocking cells (ms).
        #[arg(long, default_value_t = 100)]
        hold_ms: u64,
        /// Lock latency at or above which a call counts as blocked (ms).
        #[arg(long, default_value_t = 25)]
        block_threshold_ms: u64,
    },
    /// Measure how evenly contending threads acquire one mutex.
    FairnessProbe {
        #[arg(long, default_value = "normal")]
        kind: String,
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 200)]
        duration_ms: u64,
        /// Busy iterations inside the critical section.
        #[arg(long, default_value_t = 64)]
        critical_spins: u32,
        /// JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Optional JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
    /// Re-hash the files listed in an artifact index.
    VerifyArtifacts {
        #[arg(long)]
        index: PathBuf,
        /// Root the index paths are relative to.
        #[arg(long, default_value = ".")]
        workspace_root: PathBuf,
    },
}

fn parse_kind(raw: &str) -> Result<MutexType, Box<dyn std::error::Error>> {
    ALL_KINDS
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| {
            format!("Unsupported mutex kind '{raw}', expected normal|recursive|errorcheck|default")
                .into()
        })
}

fn parse_mode(raw: &str) -> Result<SafetyLevel, Box<dyn std::error::Error>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Ok(SafetyLevel::Strict),
        "hardened" => Ok(SafetyLevel::Hardened),
        other => Err(format!("Unsupported mode '{other}', expected strict|hardened").into()),
    }
}

fn write_output(path: Option<&Path>, body: &str) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, body)?;
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::ContractMatrix {
            output_dir,
            stem,
            run_id,
            kinds,
            mode,
            hold_ms,
            block_threshold_ms,
        } => {
            set_safety_level(parse_mode(&mode)?);
            let kinds = if kinds.is_empty() {
                ALL_KINDS.to_vec()
            } else {
                kinds
                    .iter()
                    .map(|raw| parse_kind(raw))
                    .collect::<Result<Vec<_>, _>>()?
            };
            let timing = MatrixTiming {
                hold_for: Duration::from_millis(hold_ms),
                block_threshold: Duration::from_millis(block_threshold_ms),
            };
            if timing.block_threshold >= timing.hold_for {
                return Err("--block-threshold-ms must be below --hold-ms".into());
            }

            let report = contract_matrix::build_contract_matrix(&kinds, timing)?;
            let root = std::env::current_dir()?;
            let index =
                contract_matrix::write_matrix_artifacts(&report, &root, &output_dir, &stem, &run_id)?;
            eprintln!(
                "contract matrix: {} cases, {} passed, {} model-only, {} mismatched ({} artifacts)",
                report.summary.total_cases,
                report.summary.passed,
                report.summary.model_only,
                report.summary.mismatched,
                index.artifacts.len()
            );
            if !report.all_passed() {
                for line in report.mismatches() {
                    eprintln!("  {line}");
                }
                return Err(format!(
                    "Contract matrix failed: {} mismatch(es)",
                    report.summary.mismatched
                )
                .into());
            }
        }
        Command::FairnessProbe {
            kind,
            threads,
            duration_ms,
            critical_spins,
            output,
            log,
        } => {
            let config = FairnessConfig {
                kind: parse_kind(&kind)?,
                threads,
                duration: Duration::from_millis(duration_ms),
                critical_spins,
            };
            let report = run_fairness_probe(config)?;
            if let Some(log_path) = log {
                if let Some(parent) = log_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut emitter = LogEmitter::to_file(&log_path, FAIRNESS_BEAD, "local")?;
                let level = if report.no_starvation() {
                    LogLevel::Info
                } else {
                    LogLevel::Warn
                };
                emitter.emit_entry(
                    LogEntry::new("", level, "fairness_probe")
                        .with_stream(StreamKind::Probe)
                        .with_mutex_kind(report.mutex_kind.clone())
                        .with_duration_ms(report.duration_ms)
                        .with_details(serde_json::to_value(&report)?),
                )?;
                emitter.flush()?;
            }
            write_output(output.as_deref(), &serde_json::to_string_pretty(&report)?)?;
            if !report.no_starvation() {
                eprintln!(
                    "fairness probe: a thread made no progress (acquisitions={:?})",
                    report.acquisitions
                );
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            if !errors.is_empty() {
                for err in &errors {
                    eprintln!("{err}");
                }
                return Err(format!(
                    "{}: {} violation(s) in {lines} record(s)",
                    log.display(),
                    errors.len()
                )
                .into());
            }
            eprintln!("{}: {lines} record(s) valid", log.display());
        }
        Command::VerifyArtifacts {
            index,
            workspace_root,
        } => {
            let body = std::fs::read_to_string(&index)?;
            let parsed: ArtifactIndex = serde_json::from_str(&body)?;
            let stale = parsed.stale_entries(&workspace_root);
            if !stale.is_empty() {
                return Err(format!("Stale or missing artifacts: {}", stale.join(", ")).into());
            }
            eprintln!("{} artifact(s) verified", parsed.artifacts.len());
        }
    }

    Ok(())
}
