//! CLI arguments, environment configuration and server defaults.

use clap::{Parser, Subcommand};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SESSION_COOKIE_NAME: &str = "PORTAL_SESSION";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/reports.db";
pub const DEFAULT_REPORT_DIR: &str = "public/uploads/reports";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;
pub const DEFAULT_UPLOAD_MAX_SIZE: usize = 50 * 1024 * 1024;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;

pub const LOGIN_PATH: &str = "/admin/login";
pub const UPLOAD_PATH: &str = "/admin/report-upload";
pub const REPORTS_PATH: &str = "/admin/reports";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "report-portal",
    version = VERSION_INFO,
    about = "Admin portal for publishing PDF reports"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[arg(long, env = "ADMIN_USERNAME", help = "Admin username")]
    pub admin_username: Option<String>,
    #[arg(
        long,
        env = "ADMIN_PASSWORD_HASH",
        hide_env_values = true,
        help = "Argon2 PHC hash of the admin password"
    )]
    pub admin_password_hash: Option<String>,
    #[arg(
        short = 'd',
        long,
        env = "DATABASE_URL",
        default_value = DEFAULT_DATABASE_URL,
        help = "SQLite connection string for report metadata"
    )]
    pub database_url: String,
    #[arg(
        short = 'b',
        long,
        env = "BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'r',
        long,
        env = "REPORT_DIR",
        default_value = DEFAULT_REPORT_DIR,
        help = "Directory holding uploaded report files"
    )]
    pub report_dir: String,
    #[arg(
        long,
        env = "SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        value_parser = clap::value_parser!(u64).range(1..=MAX_SESSION_TTL_SECS),
        help = "Session expiration in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes"
    )]
    pub upload_max_size: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print an Argon2 hash for use as ADMIN_PASSWORD_HASH.
    HashPassword {
        /// Plaintext password to hash.
        password: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let args = Args::try_parse_from([
            "report-portal",
            "--admin-username",
            "editor",
            "--admin-password-hash",
            "$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaA",
        ])
        .expect("parse args");

        assert_eq!(args.admin_username.as_deref(), Some("editor"));
        assert_eq!(args.report_dir, DEFAULT_REPORT_DIR);
        assert_eq!(args.upload_max_size, DEFAULT_UPLOAD_MAX_SIZE);
        assert!(args.command.is_none());
    }

    #[test]
    fn hash_password_subcommand_parses() {
        let args = Args::try_parse_from(["report-portal", "hash-password", "hunter2"])
            .expect("parse args");

        match args.command {
            Some(Command::HashPassword { password }) => assert_eq!(password, "hunter2"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn session_ttl_is_bounded() {
        let parse = |ttl: &str| {
            Args::try_parse_from(["report-portal", "--session-ttl-secs", ttl])
                .map(|args| args.session_ttl_secs)
        };

        assert_eq!(parse("3600").expect("parse args"), 3600);
        assert_eq!(
            parse(&MAX_SESSION_TTL_SECS.to_string()).expect("parse args"),
            MAX_SESSION_TTL_SECS
        );
        assert!(parse("0").is_err());
        assert!(parse(&(MAX_SESSION_TTL_SECS + 1).to_string()).is_err());
        assert!(parse(&u64::MAX.to_string()).is_err());
    }
}
