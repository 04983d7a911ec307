use crate::{
    models::bucket::{CollectionId, DEFAULT_BUCKET_ID},
    services::kinto_client::BasicAuth,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

const DEFAULT_SERVER_URL: &str = "https://kinto.dev.mozaws.net/v1";
const DEFAULT_CREDENTIALS: &str = "user:pass";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_url: String,
    pub credentials: BasicAuth,
    pub bucket: String,
    pub host: String,
    pub port: u16,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload and list attachments on a Kinto server")]
pub struct Args {
    /// Server base URL (overrides UPLOADER_SERVER)
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Credentials as `user:pass` (overrides UPLOADER_AUTH)
    #[arg(long, global = true)]
    pub auth: Option<String>,

    /// Bucket holding the collections (overrides UPLOADER_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Host the web page binds to (overrides UPLOADER_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port the web page binds to (overrides UPLOADER_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create missing objects, then serve the upload page (default)
    Serve,
    /// Create the bucket and collections if they are missing
    Init,
    /// Upload a file as a new record
    Upload {
        #[arg(long, value_enum)]
        collection: CollectionId,
        /// Value stored in the record's `type` field
        #[arg(long = "type", default_value = "")]
        kind: String,
        /// Compress the file before uploading
        #[arg(long)]
        gzip: bool,
        file: PathBuf,
    },
    /// Print the records of a collection
    List {
        #[arg(long, value_enum, default_value_t = CollectionId::Font)]
        collection: CollectionId,
    },
    /// Download the attachments of a collection
    Download {
        #[arg(long, value_enum)]
        collection: CollectionId,
        #[arg(long, default_value = ".")]
        folder: PathBuf,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let command = args.command.clone().unwrap_or(Command::Serve);
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, command))
    }

    /// Merge `args` over the variables returned by `lookup`, then defaults.
    fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // --- Environment fallback ---
        let env_port = match lookup("UPLOADER_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing UPLOADER_PORT value `{}`", value))?,
            None => 3000,
        };
        let credentials = args
            .auth
            .or_else(|| lookup("UPLOADER_AUTH"))
            .unwrap_or_else(|| DEFAULT_CREDENTIALS.into());
        let credentials = BasicAuth::parse(&credentials)
            .ok_or_else(|| anyhow!("credentials must be formatted as `user:pass`"))?;

        // --- Merge ---
        Ok(Self {
            server_url: args
                .server
                .or_else(|| lookup("UPLOADER_SERVER"))
                .unwrap_or_else(|| DEFAULT_SERVER_URL.into()),
            credentials,
            bucket: args
                .bucket
                .or_else(|| lookup("UPLOADER_BUCKET"))
                .unwrap_or_else(|| DEFAULT_BUCKET_ID.into()),
            host: args
                .host
                .or_else(|| lookup("UPLOADER_HOST"))
                .unwrap_or_else(|| "127.0.0.1".into()),
            port: args.port.unwrap_or(env_port),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Option<Command>)> {
        let args = Args::try_parse_from(argv)?;
        let command = args.command.clone();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cfg = AppConfig::resolve(args, |key| vars.get(key).cloned())?;
        Ok((cfg, command))
    }

    #[test]
    fn defaults_apply_without_flags_or_env() {
        let (cfg, command) = resolve(&["uploader"], &[]).unwrap();
        assert_eq!(cfg.server_url, DEFAULT_SERVER_URL);
        assert_eq!(cfg.credentials.user(), "user");
        assert_eq!(cfg.bucket, "fennec-ota");
        assert_eq!(cfg.addr(), "127.0.0.1:3000");
        assert_eq!(command, None);
    }

    #[test]
    fn flags_override_environment() {
        let (cfg, _) = resolve(
            &["uploader", "--server", "http://flag/v1", "--port", "8080", "list"],
            &[
                ("UPLOADER_SERVER", "http://env/v1"),
                ("UPLOADER_PORT", "9000"),
                ("UPLOADER_BUCKET", "staging"),
                ("UPLOADER_AUTH", "alice:s3:cret"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.server_url, "http://flag/v1");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.bucket, "staging");
        assert_eq!(cfg.credentials.user(), "alice");
    }

    #[test]
    fn invalid_port_in_environment_is_an_error() {
        let err = resolve(&["uploader"], &[("UPLOADER_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("UPLOADER_PORT"));
    }

    #[test]
    fn credentials_need_a_separator() {
        assert!(resolve(&["uploader", "--auth", "nobody"], &[]).is_err());
    }

    #[test]
    fn parses_upload_command() {
        let (_, command) = resolve(
            &[
                "uploader", "upload", "--collection", "hyphenation", "--type", "en", "--gzip",
                "hyph_en.dic",
            ],
            &[],
        )
        .unwrap();
        assert_eq!(
            command,
            Some(Command::Upload {
                collection: CollectionId::Hyphenation,
                kind: "en".into(),
                gzip: true,
                file: PathBuf::from("hyph_en.dic"),
            })
        );
    }

    #[test]
    fn rejects_unknown_collection() {
        assert!(Args::try_parse_from(["uploader", "list", "--collection", "fonts"]).is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let (cfg, _) = resolve(&["uploader", "--auth", "bob:hunter2"], &[]).unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
