use chrono::{FixedOffset, Offset, Utc};
use secrecy::Secret;

pub const DEFAULT_MAX_BATCH_SIZE: u32 = 3000;
pub const DEFAULT_REPORT_UTC_OFFSET_HOURS: i32 = 8;

#[derive(Debug)]
pub struct Config {
    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    /// Public origin of the registration front-end, encoded into QR codes
    pub base_url: String,
    pub host: String,
    pub port: u16,

    // Admin gate
    pub admin_password: Option<Secret<String>>,

    // Token generation
    pub max_batch_size: u32,

    // Reporting
    pub report_utc_offset_hours: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let report_utc_offset_hours = config
            .get::<i32>("report_utc_offset_hours")
            .unwrap_or(DEFAULT_REPORT_UTC_OFFSET_HOURS);
        if !(-23..=23).contains(&report_utc_offset_hours) {
            return Err(config::ConfigError::Message(format!(
                "REPORT_UTC_OFFSET_HOURS must be between -23 and 23, got {}",
                report_utc_offset_hours
            )));
        }

        Ok(Self {
            database_url: config.get("database_url").ok(),
            base_url: config.get("base_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port").unwrap_or(3000),

            admin_password: config
                .get::<String>("admin_password")
                .ok()
                .filter(|p| !p.is_empty())
                .map(Secret::new),

            max_batch_size: config
                .get("max_batch_size")
                .unwrap_or(DEFAULT_MAX_BATCH_SIZE),

            report_utc_offset_hours,
        })
    }

    /// Offset used when rendering timestamps in exports
    pub fn report_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.report_utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}
