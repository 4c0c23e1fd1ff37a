use crate::services::s3_blob_store::S3Config;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Which blob backend payloads go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BlobBackendKind {
    /// S3-compatible service such as MinIO.
    S3,
    /// Local filesystem under `blob_storage_dir/{bucket}`.
    Disk,
}

impl FromStr for BlobBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "minio" => Ok(Self::S3),
            "disk" | "local" => Ok(Self::Disk),
            other => bail!("unknown blob backend `{}` (expected `s3` or `disk`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub blob_backend: BlobBackendKind,
    pub blob_storage_dir: PathBuf,
    pub s3: S3Config,
    pub max_upload_bytes: usize,
    /// Abort start-up when the schema or bucket cannot be ensured.
    pub strict_startup: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Recipe repository: recipe metadata linked to binaries in object storage")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Metadata database URL (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend (overrides BLOB_BACKEND)
    #[arg(long, value_enum)]
    pub blob_backend: Option<BlobBackendKind>,

    /// Root directory for the disk backend (overrides BLOB_STORAGE_DIR)
    #[arg(long)]
    pub blob_storage_dir: Option<PathBuf>,

    /// S3 endpoint (overrides MINIO_ENDPOINT)
    #[arg(long)]
    pub minio_endpoint: Option<String>,

    /// Bucket name (overrides MINIO_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Largest accepted upload in bytes (overrides MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Fail start-up if the schema or bucket cannot be ensured
    #[arg(long)]
    pub strict_startup: bool,

    /// Ensure the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge parsed CLI args over values from `lookup` (the environment) over defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        // --- Environment fallback ---
        let env_port = parse_var(&lookup, "PORT", 8000u16)?;
        let env_backend = parse_var(&lookup, "BLOB_BACKEND", BlobBackendKind::S3)?;
        let env_max_upload = parse_var(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_secure = parse_bool_var(&lookup, "MINIO_SECURE", false)?;
        let env_strict = parse_bool_var(&lookup, "STRICT_STARTUP", false)?;

        let s3 = S3Config {
            endpoint: args
                .minio_endpoint
                .unwrap_or_else(|| var("MINIO_ENDPOINT", "http://minio:9000")),
            access_key: var("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: var("MINIO_SECRET_KEY", "minioadmin"),
            secure: env_secure,
            bucket: args
                .bucket
                .unwrap_or_else(|| var("MINIO_BUCKET_NAME", "recipe-binaries")),
            region: var("MINIO_REGION", "us-east-1"),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or_else(|| var("HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            database_url: args
                .database_url
                .unwrap_or_else(|| var("DATABASE_URL", "sqlite://./data/recipe_repository.db")),
            blob_backend: args.blob_backend.unwrap_or(env_backend),
            blob_storage_dir: args
                .blob_storage_dir
                .unwrap_or_else(|| PathBuf::from(var("BLOB_STORAGE_DIR", "./data/blobs"))),
            s3,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            strict_startup: args.strict_startup || env_strict,
        };

        if cfg.max_upload_bytes == 0 {
            bail!("MAX_UPLOAD_BYTES must be greater than zero");
        }
        if cfg.s3.bucket.trim().is_empty() {
            bail!("bucket name must not be empty");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory acting as the bucket for the disk backend.
    pub fn disk_bucket_dir(&self) -> PathBuf {
        self.blob_storage_dir.join(&self.s3.bucket)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

fn parse_bool_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool> {
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => bail!("parsing {} value `{}`: expected a boolean", name, other),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_env_or_args() {
        let cfg = AppConfig::from_sources(Args::default(), env(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8000");
        assert_eq!(cfg.blob_backend, BlobBackendKind::S3);
        assert_eq!(cfg.s3.bucket, "recipe-binaries");
        assert_eq!(cfg.s3.endpoint_url(), "http://minio:9000");
        assert!(!cfg.strict_startup);
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn env_is_read_and_cli_wins() {
        let args = Args {
            port: Some(9100),
            ..Args::default()
        };
        let cfg = AppConfig::from_sources(
            args,
            env(&[
                ("PORT", "9000"),
                ("HOST", "127.0.0.1"),
                ("MINIO_SECURE", "True"),
                ("MINIO_BUCKET_NAME", "firmware"),
                ("BLOB_BACKEND", "disk"),
                ("BLOB_STORAGE_DIR", "/var/lib/blobs"),
                ("STRICT_STARTUP", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9100");
        assert!(cfg.s3.secure);
        assert_eq!(cfg.blob_backend, BlobBackendKind::Disk);
        assert_eq!(cfg.disk_bucket_dir(), PathBuf::from("/var/lib/blobs/firmware"));
        assert!(cfg.strict_startup);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(AppConfig::from_sources(Args::default(), env(&[("PORT", "http")])).is_err());
        assert!(AppConfig::from_sources(Args::default(), env(&[("MINIO_SECURE", "maybe")])).is_err());
        assert!(AppConfig::from_sources(Args::default(), env(&[("BLOB_BACKEND", "ftp")])).is_err());
        assert!(AppConfig::from_sources(Args::default(), env(&[("MAX_UPLOAD_BYTES", "0")])).is_err());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let cfg = AppConfig::from_sources(
            Args::default(),
            env(&[("MINIO_SECRET_KEY", "s3cr3t-value")]),
        )
        .unwrap();
        assert!(!format!("{cfg:?}").contains("s3cr3t-value"));
    }
}
