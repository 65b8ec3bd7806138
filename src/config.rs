use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};
use uuid::Uuid;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL that signed blob links are built on.
    pub public_base_url: String,
    pub signing_secret: String,
    pub max_upload_bytes: usize,
    pub signed_url_ttl: Duration,
    pub orphan_grace: Duration,
}

/// What the process should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Migrate,
    SweepOrphans,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Notes with file attachments")]
pub struct Args {
    /// Host to bind to (overrides NOTES_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides NOTES_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where attachment payloads are stored (overrides NOTES_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides NOTES_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL used in signed links (overrides NOTES_STORE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Maximum upload size in bytes (overrides NOTES_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Default signed URL lifetime in seconds (overrides NOTES_STORE_SIGNED_URL_TTL_SECS)
    #[arg(long)]
    pub signed_url_ttl_secs: Option<u64>,

    /// Minimum age in seconds before an unreferenced object is swept
    /// (overrides NOTES_STORE_ORPHAN_GRACE_SECS)
    #[arg(long)]
    pub orphan_grace_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Delete unreferenced objects older than the grace period and exit
    #[arg(long, conflicts_with = "migrate")]
    pub sweep_orphans: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_base_url", &self.public_base_url)
            .field("signing_secret", &"<redacted>")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("signed_url_ttl", &self.signed_url_ttl)
            .field("orphan_grace", &self.orphan_grace)
            .finish()
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, Mode)> {
        // --- Environment fallback ---
        let env_host = env::var("NOTES_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("NOTES_STORE_PORT", 3000u16)?;
        let env_storage =
            env::var("NOTES_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("NOTES_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/notes.db".into());
        let env_max_upload = env_parse("NOTES_STORE_MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?;
        let env_ttl = env_parse("NOTES_STORE_SIGNED_URL_TTL_SECS", 3600u64)?;
        let env_grace = env_parse("NOTES_STORE_ORPHAN_GRACE_SECS", 24 * 3600u64)?;

        let signing_secret = match env::var("NOTES_STORE_SIGNING_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!(
                    "NOTES_STORE_SIGNING_SECRET not set; signed URLs will not survive a restart"
                );
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
            }
        };

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_base_url = match args.public_base_url {
            Some(url) => url,
            None => env::var("NOTES_STORE_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{}:{}", host, port)),
        };

        let cfg = Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url,
            signing_secret,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            signed_url_ttl: Duration::from_secs(args.signed_url_ttl_secs.unwrap_or(env_ttl)),
            orphan_grace: Duration::from_secs(args.orphan_grace_secs.unwrap_or(env_grace)),
        };

        let mode = if args.migrate {
            Mode::Migrate
        } else if args.sweep_orphans {
            Mode::SweepOrphans
        } else {
            Mode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults_and_pick_mode() {
        let args = Args::parse_from([
            "notes-store",
            "--port",
            "8080",
            "--signed-url-ttl-secs",
            "60",
            "--public-base-url",
            "https://notes.example",
            "--sweep-orphans",
        ]);
        let (cfg, mode) = AppConfig::from_args(args).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.signed_url_ttl, Duration::from_secs(60));
        assert_eq!(cfg.public_base_url, "https://notes.example");
        assert_eq!(mode, Mode::SweepOrphans);
        assert_eq!(cfg.addr(), format!("{}:8080", cfg.host));
    }

    #[test]
    fn migrate_and_sweep_are_exclusive() {
        let parsed = Args::try_parse_from(["notes-store", "--migrate", "--sweep-orphans"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let (cfg, _) = AppConfig::from_args(Args::parse_from(["notes-store"])).unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&cfg.signing_secret));
    }
}
