//! Configuration management for fieldcrypt

use crate::crypto::{DEFAULT_PBKDF2_ITERATIONS, DEFAULT_RSA_BITS};
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Default environment variable holding the base64 master secret
pub const DEFAULT_MASTER_SECRET_ENV: &str = "FIELDCRYPT_MASTER_SECRET";

/// Iteration count used by [`Config::testing`]
pub const TEST_PBKDF2_ITERATIONS: u32 = 1_000;

/// Modulus size used by [`Config::testing`]
pub const TEST_RSA_BITS: usize = 1024;

/// Smallest modulus accepted even with the override
const MIN_RSA_BITS: usize = 1024;

const ENV_PBKDF2_ITERATIONS: &str = "FIELDCRYPT_PBKDF2_ITERATIONS";
const ENV_RSA_BITS: &str = "FIELDCRYPT_RSA_BITS";
const ENV_ALLOW_WEAK_PARAMS: &str = "FIELDCRYPT_ALLOW_WEAK_PARAMS";

/// Where the master secret is read from
#[derive(Clone, Serialize, Deserialize)]
pub struct MasterSecretConfig {
    /// Environment variable consulted on every cache miss
    #[serde(default = "default_master_secret_env")]
    pub env_var: String,

    /// Inline secret; takes precedence over `env_var`. Prefer `${VAR}` substitution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

fn default_master_secret_env() -> String {
    DEFAULT_MASTER_SECRET_ENV.to_string()
}

impl fmt::Debug for MasterSecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSecretConfig")
            .field("env_var", &self.env_var)
            .field("value", &self.value.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Password hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// PBKDF2-HMAC-SHA256 iterations for password records and password KEKs
    pub iterations: u32,

    /// Permit iteration counts below the production floor
    #[serde(default)]
    pub allow_weak_iterations: bool,
}

/// Password-path key wrapping configuration.
///
/// `wk:1:` records do not carry their iteration count, so this value is pinned
/// for the lifetime of the stored data. Independent of `password.iterations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyWrapConfig {
    /// PBKDF2-HMAC-SHA256 iterations for password KEKs
    pub kek_iterations: u32,

    /// Permit iteration counts below the production floor
    #[serde(default)]
    pub allow_weak_iterations: bool,
}

/// Asymmetric key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairConfig {
    /// RSA modulus size in bits
    pub rsa_bits: usize,

    /// Permit moduli below 2048 bits
    #[serde(default)]
    pub allow_small_modulus: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master secret source
    #[serde(default)]
    pub master_secret: MasterSecretConfig,

    /// Password hashing configuration
    #[serde(default)]
    pub password: PasswordConfig,

    /// Key wrapping configuration
    #[serde(default)]
    pub key_wrap: KeyWrapConfig,

    /// Key pair configuration
    #[serde(default)]
    pub keypair: KeyPairConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MasterSecretConfig {
    fn default() -> Self {
        MasterSecretConfig {
            env_var: default_master_secret_env(),
            value: None,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        PasswordConfig {
            iterations: DEFAULT_PBKDF2_ITERATIONS,
            allow_weak_iterations: false,
        }
    }
}

impl Default for KeyWrapConfig {
    fn default() -> Self {
        KeyWrapConfig {
            kek_iterations: DEFAULT_PBKDF2_ITERATIONS,
            allow_weak_iterations: false,
        }
    }
}

impl Default for KeyPairConfig {
    fn default() -> Self {
        KeyPairConfig {
            rsa_bits: DEFAULT_RSA_BITS,
            allow_small_modulus: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            master_secret: MasterSecretConfig::default(),
            password: PasswordConfig::default(),
            key_wrap: KeyWrapConfig::default(),
            keypair: KeyPairConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Low-cost parameters for tests and local tooling, with the overrides set explicitly
    pub fn testing() -> Self {
        Config {
            password: PasswordConfig {
                iterations: TEST_PBKDF2_ITERATIONS,
                allow_weak_iterations: true,
            },
            key_wrap: KeyWrapConfig {
                kek_iterations: TEST_PBKDF2_ITERATIONS,
                allow_weak_iterations: true,
            },
            keypair: KeyPairConfig {
                rsa_bits: TEST_RSA_BITS,
                allow_small_modulus: true,
            },
            ..Config::default()
        }
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fieldcrypt")
            .join("config.yaml")
    }

    /// Load configuration from a file (format determined by extension),
    /// with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::InvalidConfig(format!("Failed to read config file: {}", e))
        })?;

        // Substitute environment variables
        let content = Self::substitute_env_vars(&content);

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::InvalidConfig(format!("Failed to parse YAML config: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                Error::InvalidConfig(format!("Failed to parse JSON config: {}", e))
            })?
        };

        config.apply_env_overrides()?;
        config.validate()?;

        debug!("Loaded configuration from {:?}", path_ref);
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`. Values that fail to parse are
    /// rejected rather than ignored.
    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PBKDF2_ITERATIONS) {
            self.password.iterations = parse_override(ENV_PBKDF2_ITERATIONS, &value)?;
        }

        if let Some(value) = lookup(ENV_RSA_BITS) {
            self.keypair.rsa_bits = parse_override(ENV_RSA_BITS, &value)?;
        }

        if let Some(value) = lookup(ENV_ALLOW_WEAK_PARAMS) {
            let allow = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "{} must be a boolean, got {:?}",
                        ENV_ALLOW_WEAK_PARAMS, other
                    )))
                }
            };
            self.password.allow_weak_iterations = allow;
            self.key_wrap.allow_weak_iterations = allow;
            self.keypair.allow_small_modulus = allow;
        }

        Ok(())
    }

    /// Substitute environment variables in config content
    /// Supports ${VAR_NAME} syntax
    fn substitute_env_vars(content: &str) -> String {
        static VAR_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let re = match VAR_PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").ok()) {
            Some(re) => re,
            None => return content.to_string(),
        };

        re.replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::InvalidConfig(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::InvalidConfig(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path_ref, content).map_err(|e| {
            Error::InvalidConfig(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.master_secret.value.is_none() && self.master_secret.env_var.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "Either master_secret.value or master_secret.env_var is required".to_string(),
            ));
        }

        if self.password.iterations == 0 {
            return Err(Error::InvalidConfig(
                "PBKDF2 iterations must be greater than 0".to_string(),
            ));
        }

        if self.password.iterations < DEFAULT_PBKDF2_ITERATIONS {
            if !self.password.allow_weak_iterations {
                return Err(Error::InvalidConfig(format!(
                    "PBKDF2 iterations must be at least {} unless allow_weak_iterations is set",
                    DEFAULT_PBKDF2_ITERATIONS
                )));
            }
            warn!(
                "Weak PBKDF2 iteration count {} explicitly allowed",
                self.password.iterations
            );
        }

        if self.key_wrap.kek_iterations == 0 {
            return Err(Error::InvalidConfig(
                "KEK iterations must be greater than 0".to_string(),
            ));
        }

        if self.key_wrap.kek_iterations < DEFAULT_PBKDF2_ITERATIONS
            && !self.key_wrap.allow_weak_iterations
        {
            return Err(Error::InvalidConfig(format!(
                "KEK iterations must be at least {} unless key_wrap.allow_weak_iterations is set",
                DEFAULT_PBKDF2_ITERATIONS
            )));
        }

        if self.key_wrap.kek_iterations != DEFAULT_PBKDF2_ITERATIONS {
            warn!(
                "KEK iteration count is {} (default {}); changing it makes existing password-path wrapped keys unopenable",
                self.key_wrap.kek_iterations, DEFAULT_PBKDF2_ITERATIONS
            );
        }

        if self.keypair.rsa_bits < MIN_RSA_BITS {
            return Err(Error::InvalidConfig(format!(
                "RSA modulus must be at least {} bits",
                MIN_RSA_BITS
            )));
        }

        if self.keypair.rsa_bits < DEFAULT_RSA_BITS && !self.keypair.allow_small_modulus {
            return Err(Error::InvalidConfig(format!(
                "RSA modulus must be at least {} bits unless allow_small_modulus is set",
                DEFAULT_RSA_BITS
            )));
        }

        if self.keypair.rsa_bits % 8 != 0 {
            return Err(Error::InvalidConfig(
                "RSA modulus size must be a multiple of 8".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("Invalid value for {}: {:?}", name, value)))
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_production() {
        let config = Config::default();
        assert_eq!(config.password.iterations, 600_000);
        assert!(!config.password.allow_weak_iterations);
        assert_eq!(config.keypair.rsa_bits, 2048);
        assert_eq!(config.master_secret.env_var, "FIELDCRYPT_MASTER_SECRET");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_config_validates() {
        let config = Config::testing();
        assert_eq!(config.password.iterations, TEST_PBKDF2_ITERATIONS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weak_params_rejected_without_override() {
        let mut config = Config::default();
        config.password.iterations = 1_000;
        assert!(config.validate().is_err());

        config.password.allow_weak_iterations = true;
        assert!(config.validate().is_ok());

        config.keypair.rsa_bits = 1024;
        assert!(config.validate().is_err());
        config.keypair.allow_small_modulus = true;
        assert!(config.validate().is_ok());

        config.keypair.rsa_bits = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_yaml_and_json() {
        let temp = TempDir::new().unwrap();
        let config = Config::testing();

        for name in ["config.yaml", "config.json"] {
            let path = temp.path().join(name);
            config.save(&path).unwrap();
            let loaded = Config::load(&path).unwrap();
            assert_eq!(loaded.password.iterations, config.password.iterations);
            assert_eq!(loaded.keypair.rsa_bits, config.keypair.rsa_bits);
        }
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("FIELDCRYPT_TEST_SUBST_SECRET", "c2VjcmV0");
        let out = Config::substitute_env_vars(
            "value: ${FIELDCRYPT_TEST_SUBST_SECRET}\nother: ${FIELDCRYPT_TEST_UNSET_VAR}",
        );
        assert_eq!(out, "value: c2VjcmV0\nother: ${FIELDCRYPT_TEST_UNSET_VAR}");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("minimal.yaml");
        std::fs::write(&path, "logging:\n  level: debug\n  file: null\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.password.iterations, DEFAULT_PBKDF2_ITERATIONS);
    }

    fn lookup_from(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name: &str| vars.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_overrides_from(lookup_from(&[
                ("FIELDCRYPT_PBKDF2_ITERATIONS", " 700000 "),
                ("FIELDCRYPT_RSA_BITS", "3072"),
            ]))
            .unwrap();

        assert_eq!(config.password.iterations, 700_000);
        assert_eq!(config.keypair.rsa_bits, 3072);
        // Hashing iterations never move the pinned KEK count
        assert_eq!(config.key_wrap.kek_iterations, DEFAULT_PBKDF2_ITERATIONS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weak_params_flag_enables_all_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides_from(lookup_from(&[
                ("FIELDCRYPT_PBKDF2_ITERATIONS", "1000"),
                ("FIELDCRYPT_RSA_BITS", "1024"),
                ("FIELDCRYPT_ALLOW_WEAK_PARAMS", "true"),
            ]))
            .unwrap();

        assert!(config.password.allow_weak_iterations);
        assert!(config.key_wrap.allow_weak_iterations);
        assert!(config.keypair.allow_small_modulus);
        assert!(config.validate().is_ok());

        config
            .apply_overrides_from(lookup_from(&[("FIELDCRYPT_ALLOW_WEAK_PARAMS", "0")]))
            .unwrap();
        assert!(!config.password.allow_weak_iterations);
        assert!(!config.keypair.allow_small_modulus);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_override_rejected() {
        for (name, value) in [
            ("FIELDCRYPT_PBKDF2_ITERATIONS", "600k"),
            ("FIELDCRYPT_RSA_BITS", "big"),
            ("FIELDCRYPT_ALLOW_WEAK_PARAMS", "maybe"),
        ] {
            let mut config = Config::default();
            let err = config
                .apply_overrides_from(lookup_from(&[(name, value)]))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{} = {}", name, value);
        }
    }

    #[test]
    fn test_kek_iterations_validated_separately() {
        let mut config = Config::default();
        config.key_wrap.kek_iterations = 1_000;
        assert!(config.validate().is_err());

        config.key_wrap.allow_weak_iterations = true;
        assert!(config.validate().is_ok());

        config.key_wrap.kek_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_inline_secret() {
        let mut config = Config::default();
        config.master_secret.value = Some("c3VwZXItc2VjcmV0LW1hc3Rlci1rZXk=".to_string());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("c3VwZXItc2VjcmV0LW1hc3Rlci1rZXk="));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("FIELDCRYPT_MASTER_SECRET"));
    }
}
