//! lockore: password-protected record vault CLI
//!
//! Store commands:
//!   stores                        - list containers in the data directory
//!   create <store>                - create a store and set its password
//!   lock <store>                  - set a password on a settings-only store
//!   wipe <store>                  - delete a store and everything in it
//!   migrate <from> <to>           - copy every record into a new store
//!
//! Record commands:
//!   list <store>                  - record names
//!   show <store> <record>         - record fields (protected values masked)
//!   add <store> <record> -f k=v   - insert a record
//!   remove <store> <record>       - delete a record
//!
//! Settings and tools:
//!   get-setting / set-setting     - plaintext settings on the store metadata
//!   passgen, quality              - password generation and strength estimate

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lockore_core::config::{expand_tilde, LockoreConfig};
use lockore_core::logging::init_logging;
use lockore_core::CancelToken;
use lockore_crypto::password::{PasswordQuality, SPECIAL};
use lockore_crypto::pbkdf2::{Pbkdf2Params, Pbkdf2Progress};
use lockore_crypto::SecureRandom;
use lockore_storage::{DirBackend, SlotBackend};
use lockore_vault::record::head_cmp;
use lockore_vault::storage::lock_iterations;
use lockore_vault::{
    finish_migration, Field, Keep, MigrationJob, MigrationOutcome, PasswordOutcome, Record,
    Storage, StorageOptions,
};

/// Read instead of prompting when set.
const PASSWORD_ENV: &str = "LOCKORE_PASSWORD";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lockore",
    version,
    about = "Password-protected record vault",
    long_about = "lockore: keep named records of typed fields in AES-encrypted local stores"
)]
struct Cli {
    /// Path to lockore.toml configuration file
    #[arg(long, short = 'c', env = "LOCKORE_CONFIG", default_value = "~/.config/lockore/config.toml")]
    config: PathBuf,

    /// Log level filter (overrides the config file)
    #[arg(long, env = "LOCKORE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stores in the data directory
    Stores,

    /// Create a new store
    Create {
        store: String,
        /// Display name (default: the store id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0)]
        icon: i32,
        /// Settings only: do not set a password
        #[arg(long)]
        public: bool,
    },

    /// Set the password of a store created with --public
    Lock { store: String },

    /// List record names
    List {
        store: String,
        #[arg(long)]
        json: bool,
    },

    /// Show the fields of a record
    Show {
        store: String,
        record: String,
        /// Print protected values in clear
        #[arg(long)]
        reveal: bool,
        #[arg(long)]
        json: bool,
    },

    /// Insert a record
    Add {
        store: String,
        record: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Field as name=value (repeatable)
        #[arg(long = "field", short = 'f')]
        fields: Vec<String>,
        /// Protected field as name=value (repeatable)
        #[arg(long = "protected", short = 'p')]
        protected: Vec<String>,
    },

    /// Delete a record
    Remove { store: String, record: String },

    /// Print a plaintext setting
    #[command(name = "get-setting")]
    GetSetting { store: String, key: String },

    /// Change a plaintext setting
    #[command(name = "set-setting")]
    SetSetting {
        store: String,
        key: String,
        value: String,
    },

    /// Generate a random password
    Passgen {
        #[arg(long, short = 'n', default_value_t = 16)]
        length: usize,
        /// Digits and punctuation only
        #[arg(long)]
        no_letters: bool,
        /// Punctuation to draw from ("" for none)
        #[arg(long, default_value = SPECIAL)]
        special: String,
        /// Emit a printable string of at least this many bits instead
        #[arg(long, conflicts_with_all = ["length", "no_letters", "special"])]
        bits: Option<usize>,
    },

    /// Estimate the strength of a password read from the prompt
    Quality {
        /// Word list, one word per line
        #[arg(long)]
        dict: Option<PathBuf>,
    },

    /// Copy every record into a new store with its own password
    Migrate {
        from: String,
        to: String,
        /// Keep the source store and discard the copy
        #[arg(long)]
        keep_source: bool,
    },

    /// Delete a store permanently
    Wipe {
        store: String,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Print the active configuration
    Config,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = LockoreConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level, config.log.format);

    let app = App::new(config);
    match cli.command {
        Commands::Stores => app.cmd_stores(),
        Commands::Create {
            store,
            name,
            description,
            icon,
            public,
        } => app.cmd_create(&store, name.as_deref(), &description, icon, public),
        Commands::Lock { store } => app.cmd_lock(&store),
        Commands::List { store, json } => app.cmd_list(&store, json),
        Commands::Show {
            store,
            record,
            reveal,
            json,
        } => app.cmd_show(&store, &record, reveal, json),
        Commands::Add {
            store,
            record,
            description,
            fields,
            protected,
        } => app.cmd_add(&store, &record, &description, &fields, &protected),
        Commands::Remove { store, record } => app.cmd_remove(&store, &record),
        Commands::GetSetting { store, key } => app.cmd_get_setting(&store, &key),
        Commands::SetSetting { store, key, value } => app.cmd_set_setting(&store, &key, &value),
        Commands::Passgen {
            length,
            no_letters,
            special,
            bits,
        } => cmd_passgen(length, !no_letters, &special, bits),
        Commands::Quality { dict } => cmd_quality(dict.as_deref()),
        Commands::Migrate {
            from,
            to,
            keep_source,
        } => app.cmd_migrate(&from, &to, keep_source),
        Commands::Wipe { store, yes } => app.cmd_wipe(&store, yes),
        Commands::Config => app.cmd_config(&config_path),
    }
}

// ── Password prompts ──────────────────────────────────────────────────────────

fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

fn read_new_password() -> Result<SecretString> {
    let first = read_password("New password: ")?;
    if std::env::var(PASSWORD_ENV).is_err() {
        let second = read_password("Repeat password: ")?;
        if first.expose_secret() != second.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
    }
    let strength = PasswordQuality::new().strength(first.expose_secret());
    eprintln!("password strength: {}", strength.label());
    Ok(first)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn kdf_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {percent}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn report_kdf(pb: &ProgressBar, p: &Pbkdf2Progress) {
    pb.set_length(u64::from(p.total));
    pb.set_position(u64::from(p.done));
    if let Some(left) = p.remaining {
        pb.set_message(format!("{:.1}s left", left.as_secs_f64()));
    }
}

// ── Application context ───────────────────────────────────────────────────────

struct App {
    config: LockoreConfig,
    backend: DirBackend,
}

#[derive(Serialize)]
struct RecordView {
    name: String,
    description: String,
    icon: i32,
    fields: Vec<FieldView>,
}

#[derive(Serialize)]
struct FieldView {
    name: String,
    kind: &'static str,
    protected: bool,
    value: String,
}

impl App {
    fn new(config: LockoreConfig) -> Self {
        let backend = DirBackend::new(config.data_dir(), config.vault.quota_bytes);
        Self { config, backend }
    }

    fn options(&self) -> StorageOptions {
        StorageOptions::from_config(&self.config)
    }

    fn open(&self, store: &str) -> Result<Storage> {
        tracing::debug!(store, root = %self.backend.root().display(), "opening store");
        Storage::open(&self.backend, store, self.options())
            .with_context(|| format!("opening store '{store}'"))
    }

    /// Open `store` and unlock it with a prompted password.
    fn open_unlocked(&self, store: &str) -> Result<Storage> {
        let mut storage = self.open(store)?;
        let password = read_password(&format!("Password for '{store}': "))?;
        let params = Pbkdf2Params::from_config(&self.config.kdf, self.config.kdf.iterations);
        let pb = kdf_progress_bar("unlock");
        let outcome = storage.unlock_with_password(
            &password,
            &params,
            &CancelToken::new(),
            &mut |p: &Pbkdf2Progress| report_kdf(&pb, p),
        );
        pb.finish_and_clear();
        match outcome.with_context(|| format!("unlocking store '{store}'"))? {
            PasswordOutcome::Done => Ok(storage),
            PasswordOutcome::Canceled => anyhow::bail!("unlock canceled"),
        }
    }

    fn set_password(&self, storage: &mut Storage) -> Result<()> {
        let password = read_new_password()?;
        let iterations = lock_iterations(&self.config.kdf, &mut SecureRandom::new());
        let params = Pbkdf2Params::from_config(&self.config.kdf, iterations);
        let pb = kdf_progress_bar("lock");
        let outcome = storage.lock_with_password(
            &password,
            &params,
            &CancelToken::new(),
            &mut |p: &Pbkdf2Progress| report_kdf(&pb, p),
        );
        pb.finish_and_clear();
        match outcome.context("setting store password")? {
            PasswordOutcome::Done => Ok(()),
            PasswordOutcome::Canceled => anyhow::bail!("password setup canceled"),
        }
    }

    fn find_record(storage: &Storage, name: &str) -> Result<Record> {
        let heads = storage.heads()?;
        heads
            .iter()
            .find(|h| h.name() == name)
            .cloned()
            .with_context(|| format!("no record named '{name}'"))
    }

    fn cmd_stores(&self) -> Result<()> {
        let stores = self.backend.list().context("listing stores")?;
        if stores.is_empty() {
            println!("no stores in {}", self.backend.root().display());
        }
        for id in stores {
            match Storage::open(&self.backend, &id, self.options()) {
                Ok(s) => {
                    let kind = if s.is_locked() { "locked" } else { "public" };
                    println!("{id:20} {kind:8} {}", s.name());
                }
                Err(e) => println!("{id:20} {:8} ({e})", "invalid"),
            }
        }
        Ok(())
    }

    fn cmd_create(
        &self,
        store: &str,
        name: Option<&str>,
        description: &str,
        icon: i32,
        public: bool,
    ) -> Result<()> {
        Storage::create(&self.backend, store, name.unwrap_or(store), description, icon)
            .with_context(|| format!("creating store '{store}'"))?;
        if !public {
            let mut storage = self.open(store)?;
            if let Err(e) = self.set_password(&mut storage) {
                storage.wipe().context("removing half-created store")?;
                return Err(e);
            }
        }
        println!("created store '{store}'");
        Ok(())
    }

    fn cmd_lock(&self, store: &str) -> Result<()> {
        let mut storage = self.open(store)?;
        self.set_password(&mut storage)?;
        println!("store '{store}' is now password protected");
        Ok(())
    }

    fn cmd_list(&self, store: &str, json: bool) -> Result<()> {
        let storage = self.open_unlocked(store)?;
        let mut heads: Vec<&Record> = storage.heads()?.iter().collect();
        heads.sort_by(|a, b| head_cmp(a, b));
        if json {
            let names: Vec<&str> = heads.iter().map(|h| h.name()).collect();
            println!("{}", serde_json::to_string_pretty(&names)?);
            return Ok(());
        }
        for head in heads {
            if head.description().is_empty() {
                println!("{}", head.name());
            } else {
                println!("{:24} {}", head.name(), head.description());
            }
        }
        Ok(())
    }

    fn cmd_show(&self, store: &str, name: &str, reveal: bool, json: bool) -> Result<()> {
        let mut storage = self.open_unlocked(store)?;
        let head = Self::find_record(&storage, name)?;
        let record = storage.load_record(&head).context("loading record")?;

        let fields = record
            .display_order()?
            .into_iter()
            .map(|f| FieldView {
                name: f.name().to_string(),
                kind: f.kind().label(),
                protected: f.is_protected(),
                value: if f.is_protected() && !reveal {
                    "********".to_string()
                } else {
                    f.as_string()
                },
            })
            .collect();
        let view = RecordView {
            name: record.name().to_string(),
            description: record.description().to_string(),
            icon: record.icon(),
            fields,
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&view)?);
            return Ok(());
        }
        println!("{}", view.name);
        if !view.description.is_empty() {
            println!("  {}", view.description);
        }
        for f in &view.fields {
            println!("  {:16} {}", f.name, f.value);
        }
        Ok(())
    }

    fn cmd_add(
        &self,
        store: &str,
        name: &str,
        description: &str,
        fields: &[String],
        protected: &[String],
    ) -> Result<()> {
        let mut record = Record::new(name).with_description(description);
        for (spec, is_protected) in fields
            .iter()
            .map(|f| (f, false))
            .chain(protected.iter().map(|f| (f, true)))
        {
            let (key, value) = spec
                .split_once('=')
                .with_context(|| format!("field '{spec}' is not name=value"))?;
            record.append(Field::string(key, value).with_protected(is_protected))?;
        }

        let mut storage = self.open_unlocked(store)?;
        if storage.heads()?.iter().any(|h| h.name() == name) {
            anyhow::bail!("record '{name}' already exists");
        }
        storage.insert(&mut record).context("saving record")?;
        println!("added '{name}'");
        Ok(())
    }

    fn cmd_remove(&self, store: &str, name: &str) -> Result<()> {
        let mut storage = self.open_unlocked(store)?;
        let head = Self::find_record(&storage, name)?;
        storage.remove_record(&head).context("removing record")?;
        println!("removed '{name}'");
        Ok(())
    }

    fn cmd_get_setting(&self, store: &str, key: &str) -> Result<()> {
        let storage = self.open(store)?;
        let value = storage.get_value(key, "")?;
        println!("{value}");
        Ok(())
    }

    fn cmd_set_setting(&self, store: &str, key: &str, value: &str) -> Result<()> {
        let mut storage = self.open(store)?;
        storage.set_value(key, value)?;
        if storage.is_modified() {
            storage.save().context("saving settings")?;
        }
        Ok(())
    }

    fn cmd_migrate(&self, from: &str, to: &str, keep_source: bool) -> Result<()> {
        let source = self.open_unlocked(from)?;
        Storage::create(&self.backend, to, source.name(), source.description(), source.icon())
            .with_context(|| format!("creating store '{to}'"))?;
        let mut target = self.open(to)?;
        self.set_password(&mut target)?;

        let job = MigrationJob::spawn(source, target)?;
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_prefix("migrate");
        while !job.is_finished() {
            let p = job.progress();
            pb.set_length(p.total as u64);
            pb.set_position(p.done as u64);
            std::thread::sleep(Duration::from_millis(50));
        }
        pb.finish_and_clear();

        let result = job.join()?;
        let keep = if keep_source { Keep::Source } else { Keep::Target };
        let outcome = result.outcome;
        let keep = match &outcome {
            Ok(MigrationOutcome::Completed(_)) => keep,
            _ => Keep::Source,
        };
        finish_migration(result.from, result.to, keep).context("cleaning up after migration")?;
        match outcome? {
            MigrationOutcome::Completed(n) => println!("copied {n} records into '{to}'"),
            MigrationOutcome::Canceled => anyhow::bail!("migration canceled"),
        }
        Ok(())
    }

    fn cmd_wipe(&self, store: &str, yes: bool) -> Result<()> {
        if !yes {
            anyhow::bail!("refusing to wipe '{store}' without --yes");
        }
        let mut storage = self.open(store)?;
        storage.wipe().with_context(|| format!("wiping store '{store}'"))?;
        println!("wiped '{store}'");
        Ok(())
    }

    fn cmd_config(&self, config_path: &Path) -> Result<()> {
        if config_path.exists() {
            println!("# Configuration from: {}", config_path.display());
        } else {
            println!("# Configuration: defaults (no file at {})", config_path.display());
        }
        println!();
        let rendered = toml::to_string_pretty(&self.config).context("serializing config")?;
        print!("{rendered}");
        Ok(())
    }
}

fn cmd_passgen(length: usize, letters: bool, special: &str, bits: Option<usize>) -> Result<()> {
    let mut rng = SecureRandom::new();
    let password = match bits {
        Some(bits) => rng.bit_string(bits),
        None => rng.password(length, letters, special),
    };
    let quality = PasswordQuality::new();
    eprintln!(
        "{} bits ({})",
        quality.bits(&password),
        quality.strength(&password).label()
    );
    println!("{password}");
    Ok(())
}

fn cmd_quality(dict: Option<&Path>) -> Result<()> {
    let quality = match dict {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            PasswordQuality::from_reader(BufReader::new(file))
                .with_context(|| format!("reading {}", path.display()))?
        }
        None => PasswordQuality::new(),
    };
    let password = read_password("Password to rate: ")?;
    let bits = quality.bits(password.expose_secret());
    println!("{bits} bits ({})", quality.strength(password.expose_secret()).label());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "lockore", "add", "personal", "Bank", "-f", "user=alice", "-p", "pin=1234",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                store,
                record,
                fields,
                protected,
                ..
            } => {
                assert_eq!(store, "personal");
                assert_eq!(record, "Bank");
                assert_eq!(fields, vec!["user=alice"]);
                assert_eq!(protected, vec!["pin=1234"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_passgen_bits_conflicts_with_length() {
        assert!(Cli::try_parse_from(["lockore", "passgen", "--bits", "128", "-n", "8"]).is_err());
    }
}
