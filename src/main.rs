//! fieldcrypt - administrative tool for the field encryption core
//!
//! Usage:
//!   fieldcrypt keygen                  - Generate a new master secret
//!   fieldcrypt token                   - Generate a session / invite token
//!   fieldcrypt check                   - Validate configuration and master secret
//!   fieldcrypt hash-password           - Produce a password record
//!   fieldcrypt verify-password <rec>   - Check a password against a record
//!   fieldcrypt encrypt <value>         - Encrypt a value under the master key
//!   fieldcrypt decrypt <envelope>      - Decrypt an enc:1 envelope
//!   fieldcrypt blind-index <value>     - Compute a lookup index

use clap::{Parser, Subcommand};
use fieldcrypt::{crypto::generate_master_secret, Config, Error, Result, Vault};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "fieldcrypt")]
#[command(author = "fieldcrypt Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Envelope encryption for sensitive database fields")]
struct Cli {
    /// Configuration file path (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new base64 master secret
    Keygen,

    /// Generate a 256-bit base64url token
    Token,

    /// Validate the configuration and the master secret it points at
    Check,

    /// Hash a password into a pbkdf2 record
    HashPassword {
        /// Password (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Verify a password against a pbkdf2 record
    VerifyPassword {
        /// Stored password record
        record: String,

        /// Password (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Encrypt a value under the master key
    Encrypt {
        /// Plaintext value
        value: String,
    },

    /// Decrypt an enc:1 envelope under the master key
    Decrypt {
        /// Envelope string
        envelope: String,

        /// Pass values without the envelope prefix through unchanged
        #[arg(long)]
        lenient: bool,
    },

    /// Compute the blind index of a value
    BlindIndex {
        /// Plaintext value
        value: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref().map(expand_tilde);
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };

    let log_file = config.logging.file.as_deref().map(expand_tilde);
    let writer = match log_writer(log_file.as_deref()) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Error: failed to open log file: {}", e);
            std::process::exit(1);
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .with_ansi(log_file.is_none())
        .with_writer(writer)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    if let Err(e) = run_command(cli.command, &config) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Log to `file` (appending) when configured, stderr otherwise
fn log_writer(file: Option<&Path>) -> Result<BoxMakeWriter> {
    match file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let default_path = Config::default_path();
            if default_path.exists() {
                Config::load(&default_path)
            } else {
                Config::from_env()
            }
        }
    }
}

fn run_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Keygen => cmd_keygen(),
        Commands::Token => cmd_token(),
        Commands::Check => cmd_check(config),
        Commands::HashPassword { password } => cmd_hash_password(config, password),
        Commands::VerifyPassword { record, password } => {
            cmd_verify_password(config, &record, password)
        }
        Commands::Encrypt { value } => cmd_encrypt(config, &value),
        Commands::Decrypt { envelope, lenient } => cmd_decrypt(config, &envelope, lenient),
        Commands::BlindIndex { value } => cmd_blind_index(config, &value),
    }
}

fn cmd_keygen() -> Result<()> {
    let secret = Zeroizing::new(generate_master_secret()?);
    println!("{}", secret.as_str());
    info!("Store this value in {} or your secret store", fieldcrypt::config::DEFAULT_MASTER_SECRET_ENV);
    Ok(())
}

fn cmd_token() -> Result<()> {
    println!("{}", Vault::generate_secure_token()?);
    Ok(())
}

fn cmd_check(config: &Config) -> Result<()> {
    Vault::new(config)?;
    println!("Configuration OK");
    println!("  PBKDF2 iterations: {}", config.password.iterations);
    println!("  KEK iterations:    {}", config.key_wrap.kek_iterations);
    println!("  RSA modulus:       {} bits", config.keypair.rsa_bits);
    Ok(())
}

fn read_password(password: Option<String>) -> Result<Zeroizing<String>> {
    match password {
        Some(p) => Ok(Zeroizing::new(p)),
        None => rpassword::prompt_password("Password: ")
            .map(Zeroizing::new)
            .map_err(|e| Error::Internal(format!("Failed to read password: {}", e))),
    }
}

// Password commands only need the hasher, not the master secret
fn cmd_hash_password(config: &Config, password: Option<String>) -> Result<()> {
    let hasher = fieldcrypt::crypto::PasswordHasher::from_config(&config.password)?;
    let password = read_password(password)?;
    println!("{}", hasher.hash(&password)?);
    Ok(())
}

fn cmd_verify_password(config: &Config, record: &str, password: Option<String>) -> Result<()> {
    let hasher = fieldcrypt::crypto::PasswordHasher::from_config(&config.password)?;
    let password = read_password(password)?;
    if hasher.verify(&password, record) {
        println!("Password matches");
        if hasher.needs_rehash(record) {
            println!("Record uses fewer iterations than configured; rehash on next login");
        }
        Ok(())
    } else {
        println!("Password does not match");
        std::process::exit(2);
    }
}

fn cmd_encrypt(config: &Config, value: &str) -> Result<()> {
    let vault = Vault::new(config)?;
    println!("{}", vault.encrypt(value)?);
    Ok(())
}

fn cmd_decrypt(config: &Config, envelope: &str, lenient: bool) -> Result<()> {
    let vault = Vault::new(config)?;
    let plaintext = if lenient {
        vault.decrypt_if_envelope(envelope)?
    } else {
        vault.decrypt(envelope)?
    };
    println!("{}", plaintext);
    Ok(())
}

fn cmd_blind_index(config: &Config, value: &str) -> Result<()> {
    let vault = Vault::new(config)?;
    println!("{}", vault.blind_index(value)?);
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
