//! Biomatch - CLI
//!
//! Podgląd polityki, jednorazowa weryfikacja 1:1 względem galerii
//! w pamięci oraz identyfikacja 1:N w katalogu referencyjnym.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use biomatch_auth::{
    telemetry, AuthError, AuthRequest, Authenticator, ChannelAuditSink, Decision, EngineConfig,
    Enroller, HmacSessionIssuer, IdentityRegistry, SecurityLevel, SecurityPolicy,
};
use biomatch_core::{
    Algorithm, BoundedExecutor, CancelToken, CorpusEntry, ExtractorRegistry,
    HeuristicQualityAssessor, Modality, Probe, ReferenceCorpus,
};

#[derive(Parser)]
#[command(name = "biomatch")]
#[command(version = biomatch_auth::VERSION)]
#[command(about = "Biomatch - multi-algorithm biometric matching and adaptive authentication")]
struct Cli {
    /// Config file (overrides BIOMATCH_CONFIG and the per-user file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print JSON instead of the human summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or validate a security policy table
    #[command(subcommand)]
    Policy(PolicyCommand),

    /// Enroll a gallery in memory, then authenticate one probe against it
    Verify {
        /// Identity to enroll and claim
        #[arg(long)]
        identity: String,

        /// face | fingerprint
        #[arg(short, long)]
        modality: Modality,

        /// Requested security level
        #[arg(short, long, default_value = "MEDIUM")]
        level: SecurityLevel,

        /// Directory of enrollment images
        #[arg(long)]
        gallery: PathBuf,

        /// Probe image
        probe: PathBuf,
    },

    /// Rank every image of a corpus directory against a probe
    Identify {
        /// Algorithm to scan with
        #[arg(short, long)]
        algorithm: Algorithm,

        /// Directory of reference images
        #[arg(long)]
        corpus: PathBuf,

        /// Number of matches to print
        #[arg(long, default_value_t = 5)]
        top: usize,

        /// Probe image
        probe: PathBuf,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Print the effective policy table
    Show,

    /// Validate a policy file
    Check {
        /// Policy JSON file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        // Misconfiguration or a dead matcher, not a caller mistake
        let auth = e.downcast_ref::<AuthError>();
        if auth.is_some_and(AuthError::is_security_critical) {
            tracing::error!(error = %e, "security-critical failure");
            std::process::exit(2);
        }
        if auth.is_some_and(AuthError::is_input_error) {
            let hint = "Check that the probe and gallery files are readable images.";
            eprintln!("{}", style(hint).dim());
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let loaded = EngineConfig::resolve(cli.config.as_deref()).context("loading configuration")?;
    telemetry::init_tracing(loaded.config.log_format, cli.verbose);
    if let Some(source) = &loaded.source {
        tracing::debug!(path = %source.display(), "configuration loaded");
    }
    let config = loaded.config;

    match cli.command {
        Commands::Policy(PolicyCommand::Show) => {
            let policy = config.load_policy().context("loading security policy")?;
            println!("{}", policy.to_json_pretty());
        }

        Commands::Policy(PolicyCommand::Check { file }) => {
            let policy = SecurityPolicy::load(&file)
                .with_context(|| format!("policy {} is invalid", file.display()))?;
            println!("✅ {} is valid", file.display());
            for level in SecurityLevel::ALL {
                let p = policy.level(level);
                println!(
                    "   {:<8} fusion ≥ {:.2}  quality ≥ {:.2}  {} attempts / {}s",
                    level, p.fusion_threshold, p.min_quality, p.max_attempts, p.lockout_seconds
                );
            }
        }

        Commands::Verify {
            identity,
            modality,
            level,
            gallery,
            probe,
        } => {
            verify(&config, cli.json, &identity, modality, level, &gallery, &probe).await?;
        }

        Commands::Identify {
            algorithm,
            corpus,
            top,
            probe,
        } => {
            identify(&config, cli.json, algorithm, &corpus, top, &probe).await?;
        }
    }

    Ok(())
}

/// Regular files of a directory, sorted by name
fn read_dir_sorted(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let label = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
            let bytes =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            Ok((label, bytes))
        })
        .collect()
}

async fn verify(
    config: &EngineConfig,
    json: bool,
    identity: &str,
    modality: Modality,
    level: SecurityLevel,
    gallery: &Path,
    probe: &Path,
) -> Result<()> {
    let policy = Arc::new(config.load_policy().context("loading security policy")?);
    let extractors = Arc::new(ExtractorRegistry::standard());
    let quality = Arc::new(HeuristicQualityAssessor::new(config.quality.clone()));
    let audit = Arc::new(ChannelAuditSink::new(config.audit_capacity));
    let registry = Arc::new(IdentityRegistry::new());

    let images: Vec<Vec<u8>> = read_dir_sorted(gallery)?
        .into_iter()
        .map(|(_, bytes)| bytes)
        .collect();
    registry.register(identity, level)?;
    let enrolled = Enroller::new(extractors.clone(), policy.clone())
        .with_preprocessor(config.preprocess)
        .with_quality(quality.clone())
        .with_audit(audit.clone())
        .enroll(&registry, identity, &images, modality)
        .context("enrolling gallery")?;
    if !json {
        println!(
            "📥 Enrolled {} templates from {} images for '{}'",
            enrolled,
            images.len(),
            identity
        );
    }

    let auth = Authenticator::builder(registry)
        .policy(policy)
        .extractors(extractors)
        .preprocessor(config.preprocess)
        .quality(quality)
        .executor(BoundedExecutor::new(config.executor_config()))
        .sessions(Arc::new(HmacSessionIssuer::generate(config.session_ttl())))
        .audit(audit.clone())
        .build();

    let bytes = std::fs::read(probe).with_context(|| format!("reading {}", probe.display()))?;
    let request = AuthRequest::new(identity, Probe::new(modality, bytes), level);
    let response = auth.authenticate(&request).await?;
    audit.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let decision = match response.decision {
        Decision::Accept => style(response.decision.as_str()).green().bold(),
        Decision::Reject => style(response.decision.as_str()).red().bold(),
        Decision::RejectedQuality | Decision::LockedOut => {
            style(response.decision.as_str()).yellow().bold()
        }
    };
    println!("🔐 Decision: {}", decision);
    println!(
        "   Level {}  fused {:.4} / threshold {:.2}  ({} ms)",
        response.security_level,
        response.fused_confidence,
        response.fusion_threshold,
        response.elapsed_ms
    );
    if let Some(q) = response.quality {
        println!("   Quality {:.3}", q);
    }
    if let Some(secs) = response.retry_after_secs {
        println!("   Locked, retry in {}s", secs);
    }
    if !response.per_algorithm.is_empty() {
        println!("{:-<48}", "");
        for (algorithm, score) in &response.per_algorithm {
            let value = score
                .score
                .map(|s| format!("{:.4}", s))
                .unwrap_or_else(|| "null".into());
            let mark = if score.passed { "✓" } else { " " };
            let note = score.note.as_deref().unwrap_or("");
            println!("   {} {:<10} {:>8}  {}", mark, algorithm, value, note);
        }
    }
    if response.session.is_some() {
        println!("🎫 Session issued (ttl {}s)", config.session_ttl_seconds);
    }
    Ok(())
}

async fn identify(
    config: &EngineConfig,
    json: bool,
    algorithm: Algorithm,
    corpus_dir: &Path,
    top: usize,
    probe: &Path,
) -> Result<()> {
    let corpus = ReferenceCorpus::from_entries(
        read_dir_sorted(corpus_dir)?
            .into_iter()
            .map(|(label, bytes)| CorpusEntry::image(label, bytes)),
    );
    let bytes = std::fs::read(probe).with_context(|| format!("reading {}", probe.display()))?;
    let probe = Probe::new(algorithm.modality(), bytes);

    let auth = Authenticator::builder(Arc::new(IdentityRegistry::new()))
        .preprocessor(config.preprocess)
        .executor(BoundedExecutor::new(config.executor_config()))
        .build();

    let bar = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(corpus.len() as u64)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .context("progress template")?
            .progress_chars("=> "),
    );
    bar.set_message(format!("scanning with {algorithm}"));

    let report = auth
        .scanner()
        .scan_observed(&probe, algorithm, &corpus, &CancelToken::new(), |done, _| {
            bar.set_position(done as u64)
        })
        .await
        .context("identification scan")?;
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "🔎 {} over {} entries (corpus v{}): {} ranked, {} skipped in {} ms",
        algorithm,
        report.corpus_size,
        report.corpus_version,
        report.ranked.len(),
        report.skipped.len(),
        report.elapsed_ms
    );
    println!("{:-<48}", "");
    for (rank, m) in report.top(top).iter().enumerate() {
        println!("   {:>2}. {:<32} {:.4}", rank + 1, m.label, m.score);
    }
    for skipped in &report.skipped {
        println!("   {} {} ({:?})", style("skipped").dim(), skipped.label, skipped.reason);
    }
    Ok(())
}
