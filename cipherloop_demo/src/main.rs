use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cipherloop_core::{
    AuthLevel, CycleReport, EncryptedRecord, Orchestrator, OrchestratorConfig, RoleTag, RootKey,
    SecurityLevel, SemanticFields,
};
use env_logger::Env;
use log::{LevelFilter, debug, info};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "cipherloop",
    author,
    version,
    about = "Field-level HKP encryption with adversarial calibration (experimental)"
)]
struct Cli {
    #[arg(long, global = true)]
    debug: bool,
    /// Root key as `hex:<64 hex chars>` or a passphrase.
    #[arg(long, global = true, default_value = "cipherloop-demo-root")]
    key: String,
    #[arg(long, global = true, value_enum, default_value = "standard")]
    security_level: SecurityLevelArg,
    /// JSON orchestrator config; overrides the security level preset.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "SECS")]
    epoch_window: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SecurityLevelArg {
    Toy,
    Standard,
    Paranoid,
}

impl From<SecurityLevelArg> for SecurityLevel {
    fn from(arg: SecurityLevelArg) -> Self {
        match arg {
            SecurityLevelArg::Toy => SecurityLevel::Toy,
            SecurityLevelArg::Standard => SecurityLevel::Standard,
            SecurityLevelArg::Paranoid => SecurityLevel::Paranoid,
        }
    }
}

#[derive(Args)]
struct FieldsArgs {
    /// JSON `SemanticFields` file; takes precedence over the inline flags.
    #[arg(long, value_name = "FILE")]
    fields: Option<PathBuf>,
    #[arg(long, value_name = "TEXT")]
    intent: Option<String>,
    /// Entity as `name=value`; repeatable.
    #[arg(long = "entity", value_name = "NAME=VALUE")]
    entities: Vec<String>,
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=5))]
    auth_level: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random root key and print it in `hex:` form.
    Keygen {
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Seal one request under the configured parameters.
    Encrypt {
        #[command(flatten)]
        input: FieldsArgs,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=5))]
        role: u8,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Verify and open a sealed record.
    Decrypt {
        #[arg(long, value_name = "FILE")]
        record: PathBuf,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=5))]
        role: u8,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Run calibration cycles over one request and report each.
    Cycle {
        #[command(flatten)]
        input: FieldsArgs,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=5))]
        role: u8,
        #[arg(long, default_value_t = 5)]
        count: u32,
        /// Write the full report of the last cycle as JSON.
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// Print the effective orchestrator configuration.
    Params,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = resolve_config(&cli)?;
    let root = parse_root_key(&cli.key)?;
    debug!(
        "config window={}s initial={:?}",
        config.epoch_window_secs, config.initial
    );

    match cli.command {
        Commands::Keygen { out } => cmd_keygen(out),
        Commands::Encrypt { input, role, out } => {
            let orchestrator = Orchestrator::new(root, config)?;
            cmd_encrypt(&orchestrator, &input, role, &out)
        }
        Commands::Decrypt { record, role, out } => {
            let orchestrator = Orchestrator::new(root, config)?;
            cmd_decrypt(&orchestrator, &record, role, out.as_deref())
        }
        Commands::Cycle {
            input,
            role,
            count,
            report,
        } => {
            let orchestrator = Orchestrator::new(root, config)?;
            cmd_cycle(&orchestrator, &input, role, count, report.as_deref())
        }
        Commands::Params => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default));
    builder.format_timestamp(None);
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn resolve_config(cli: &Cli) -> Result<OrchestratorConfig> {
    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OrchestratorConfig::from_preset(cli.security_level.into()),
    };
    if let Some(secs) = cli.epoch_window {
        config.epoch_window_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn parse_root_key(key: &str) -> Result<RootKey> {
    if let Some(hex) = key.strip_prefix("hex:") {
        RootKey::from_hex(hex.trim()).with_context(|| "failed to parse hex-encoded root key")
    } else if key.is_empty() {
        bail!("root key must not be empty")
    } else {
        Ok(RootKey::from_passphrase(key.as_bytes()))
    }
}

fn parse_role(level: u8) -> Result<RoleTag> {
    RoleTag::from_level(level).with_context(|| format!("role level {level} is not in 1..=5"))
}

fn resolve_fields(args: &FieldsArgs) -> Result<SemanticFields> {
    if let Some(path) = &args.fields {
        return load_json(path, "fields");
    }
    let Some(intent) = &args.intent else {
        bail!("either --fields or --intent is required");
    };
    let auth_level = AuthLevel::from(parse_role(args.auth_level)?);
    let mut fields = SemanticFields::new(intent.clone(), auth_level, Utc::now());
    for entry in &args.entities {
        let Some((name, value)) = entry.split_once('=') else {
            bail!("entity '{entry}' is not in NAME=VALUE form");
        };
        fields = fields.with_entity(name.trim(), value.trim());
    }
    Ok(fields)
}

fn cmd_keygen(out: Option<PathBuf>) -> Result<()> {
    let encoded = format!("hex:{}", RootKey::generate().to_hex());
    match out {
        Some(path) => {
            fs::write(&path, &encoded)
                .with_context(|| format!("writing root key to {}", path.display()))?;
            println!("Wrote root key to {}", path.display());
        }
        None => println!("{encoded}"),
    }
    Ok(())
}

fn cmd_encrypt(
    orchestrator: &Orchestrator,
    input: &FieldsArgs,
    role: u8,
    out: &Path,
) -> Result<()> {
    let fields = resolve_fields(input)?;
    let role = parse_role(role)?;
    let record = orchestrator
        .seal(&fields, role)
        .context("sealing fields")?;
    save_json(out, "record", &record)?;
    println!(
        "Sealed {} fields at {} ({}) to {}",
        record.encrypted_fields.len(),
        role,
        record.time_tag,
        out.display()
    );
    Ok(())
}

fn cmd_decrypt(
    orchestrator: &Orchestrator,
    record_path: &Path,
    role: u8,
    out: Option<&Path>,
) -> Result<()> {
    let record: EncryptedRecord = load_json(record_path, "record")?;
    let role = parse_role(role)?;
    let decrypted = orchestrator
        .open(&record, role, Utc::now())
        .with_context(|| format!("opening {}", record_path.display()))?;
    match out {
        Some(path) => {
            save_json(path, "decrypted fields", &decrypted)?;
            println!("Recovered {} fields to {}", decrypted.field_count(), path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&decrypted)?),
    }
    Ok(())
}

fn cmd_cycle(
    orchestrator: &Orchestrator,
    input: &FieldsArgs,
    role: u8,
    count: u32,
    report_path: Option<&Path>,
) -> Result<()> {
    let fields = resolve_fields(input)?;
    let role = parse_role(role)?;
    let mut last: Option<CycleReport> = None;
    for index in 0..count {
        let report = orchestrator
            .run_cycle(&fields, role)
            .with_context(|| format!("running cycle {index}"))?;
        print_cycle(index, &report);
        last = Some(report);
    }
    let current = orchestrator.current_parameters();
    info!("final parameters v{} {:?}", current.version, current.params);
    if let (Some(path), Some(report)) = (report_path, last.as_ref()) {
        save_json(path, "cycle report", report)?;
        println!("Wrote last cycle report to {}", path.display());
    }
    Ok(())
}

fn print_cycle(index: u32, report: &CycleReport) {
    let p = report.current.params;
    println!(
        "cycle {:>3}: score={:.3} protection={:?} mode={:?} theta=v{} [{:.2} {:.2} {:.2}]",
        index,
        report.assessment.leakage_score,
        report.assessment.hk_protection,
        report.update.mode,
        report.current.version,
        p.entropy,
        p.cipher_strength,
        p.role_decay
    );
}

fn load_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T> {
    let data =
        fs::read(path).with_context(|| format!("reading {} from {}", label, path.display()))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {} from {}", label, path.display()))?;
    Ok(value)
}

fn save_json<T: ?Sized + serde::Serialize>(path: &Path, label: &str, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)
        .with_context(|| format!("writing {} to {}", label, path.display()))?;
    Ok(())
}
