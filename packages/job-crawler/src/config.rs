use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::ConfigError;

/// Hard ceiling on pages per keyword, applied even when `max_pages` is 0.
pub const SAFETY_PAGE_CAP: u32 = 150;

const DEFAULT_KEYWORDS: &str = "flask,Python,DevOps,SRE,fastapi,django";
const DEFAULT_OUTPUT_DIR: &str = "data/raw_data";

/// Retry/backoff policy for one page fetch.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts for transient failures (first try included)
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add ±30% random jitter to each backoff
    pub jitter: bool,
    /// Rate-limit retries allowed on top of `max_attempts`
    pub max_rate_limit_retries: u32,
    /// Cool-down used when a rate-limit response carries no `Retry-After`
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            max_rate_limit_retries: 5,
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

/// Fetch layer settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Global ceiling on in-flight fetches, shared by every keyword
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub api_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            api_url: listing_client::SEARCH_API_URL.to_string(),
        }
    }
}

/// Which storage backend a run writes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres { database_url: String },
    File { output_dir: PathBuf },
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::File {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl StorageBackend {
    /// Resolve a backend by name. `postgres` reads `DATABASE_URL`; `file`
    /// uses `output_dir` or the default directory.
    pub fn from_name(name: &str, output_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres {
                database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            }),
            "file" => Ok(StorageBackend::File {
                output_dir: output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            }),
            other => Err(invalid("CRAWLER_STORAGE", other, "expected `postgres` or `file`")),
        }
    }
}

/// Delisting sweep settings.
#[derive(Debug, Clone)]
pub struct DelistPolicy {
    pub enabled: bool,
    /// Records unseen for longer than this (relative to the run's
    /// observation time) are delisted after a fully successful run.
    pub grace: chrono::Duration,
}

impl Default for DelistPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            grace: chrono::Duration::zero(),
        }
    }
}

/// Daily schedule for the cron trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { hour: 10, minute: 0 }
    }
}

impl ScheduleConfig {
    /// Six-field cron expression (seconds first) for tokio-cron-scheduler.
    pub fn cron_expression(&self) -> String {
        format!("0 {} {} * * *", self.minute, self.hour)
    }
}

/// Crawler configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub keywords: Vec<String>,
    /// Pages per keyword; 0 means "until exhausted" (still capped)
    pub max_pages: u32,
    /// Keyword workers
    pub concurrency: usize,
    pub fetch: FetchConfig,
    pub storage: StorageBackend,
    pub delist: DelistPolicy,
    pub schedule: ScheduleConfig,
    /// Shell command run after every run that did not fail (migration)
    pub post_run_command: Option<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            keywords: parse_keywords(DEFAULT_KEYWORDS),
            max_pages: 0,
            concurrency: 4,
            fetch: FetchConfig::default(),
            storage: StorageBackend::default(),
            delist: DelistPolicy::default(),
            schedule: ScheduleConfig::default(),
            post_run_command: None,
        }
    }
}

impl CrawlerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_storage(None)
    }

    /// Like [`from_env`](Self::from_env), but `storage` (a backend name)
    /// takes precedence over `CRAWLER_STORAGE`.
    pub fn from_env_with_storage(storage: Option<&str>) -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();

        let keywords = env::var("CRAWLER_KEYWORDS")
            .map(|raw| parse_keywords(&raw))
            .unwrap_or(defaults.keywords);

        let retry = RetryConfig {
            max_attempts: parse_var("CRAWLER_MAX_ATTEMPTS", defaults.fetch.retry.max_attempts)?,
            initial_backoff: Duration::from_millis(parse_var(
                "CRAWLER_BACKOFF_MS",
                defaults.fetch.retry.initial_backoff.as_millis() as u64,
            )?),
            rate_limit_cooldown: Duration::from_secs(parse_var(
                "CRAWLER_RATE_LIMIT_COOLDOWN_SECS",
                defaults.fetch.retry.rate_limit_cooldown.as_secs(),
            )?),
            ..defaults.fetch.retry
        };

        let fetch = FetchConfig {
            max_concurrency: parse_var(
                "CRAWLER_FETCH_CONCURRENCY",
                defaults.fetch.max_concurrency,
            )?,
            request_timeout: Duration::from_secs(parse_var(
                "CRAWLER_REQUEST_TIMEOUT_SECS",
                defaults.fetch.request_timeout.as_secs(),
            )?),
            retry,
            api_url: env::var("LISTING_API_URL").unwrap_or(defaults.fetch.api_url),
        };

        let storage_name = match storage {
            Some(name) => name.to_string(),
            None => env::var("CRAWLER_STORAGE").unwrap_or_else(|_| "file".to_string()),
        };
        let storage = StorageBackend::from_name(
            &storage_name,
            env::var("CRAWLER_OUTPUT_DIR").ok().map(PathBuf::from),
        )?;

        let config = Self {
            keywords,
            max_pages: parse_var("CRAWLER_MAX_PAGES", defaults.max_pages)?,
            concurrency: parse_var("CRAWLER_CONCURRENCY", defaults.concurrency)?,
            fetch,
            storage,
            delist: DelistPolicy {
                enabled: true,
                grace: grace_days(parse_var("CRAWLER_DELIST_GRACE_DAYS", 0i64)?)?,
            },
            schedule: ScheduleConfig {
                hour: parse_var("CRAWLER_SCHEDULE_HOUR", defaults.schedule.hour)?,
                minute: parse_var("CRAWLER_SCHEDULE_MINUTE", defaults.schedule.minute)?,
            },
            post_run_command: env::var("CRAWLER_POST_RUN_COMMAND")
                .ok()
                .filter(|c| !c.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Effective page limit per keyword after applying the safety cap.
    pub fn page_limit(&self) -> u32 {
        effective_page_limit(self.max_pages)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid("CRAWLER_CONCURRENCY", "0", "must be at least 1"));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(invalid("CRAWLER_FETCH_CONCURRENCY", "0", "must be at least 1"));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(invalid("CRAWLER_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        if self.schedule.hour > 23 {
            return Err(invalid(
                "CRAWLER_SCHEDULE_HOUR",
                &self.schedule.hour.to_string(),
                "must be 0-23",
            ));
        }
        if self.schedule.minute > 59 {
            return Err(invalid(
                "CRAWLER_SCHEDULE_MINUTE",
                &self.schedule.minute.to_string(),
                "must be 0-59",
            ));
        }
        if self.delist.grace < chrono::Duration::zero() {
            return Err(invalid(
                "CRAWLER_DELIST_GRACE_DAYS",
                &self.delist.grace.num_days().to_string(),
                "must not be negative",
            ));
        }
        Ok(())
    }
}

/// Delist grace period from a day count.
pub fn grace_days(days: i64) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::try_days(days)
        .ok_or_else(|| invalid("CRAWLER_DELIST_GRACE_DAYS", &days.to_string(), "out of range"))
}

/// `0` means unlimited, but never beyond [`SAFETY_PAGE_CAP`].
pub fn effective_page_limit(max_pages: u32) -> u32 {
    if max_pages == 0 {
        SAFETY_PAGE_CAP
    } else {
        max_pages.min(SAFETY_PAGE_CAP)
    }
}

/// Split a keyword list on `,` or `|`, trimming and dropping blanks.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in raw.split([',', '|']).map(str::trim).filter(|k| !k.is_empty()) {
        if !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }
    keywords
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators_and_dedupes() {
        assert_eq!(
            parse_keywords(" Python | DevOps,,SRE ,Python"),
            vec!["Python", "DevOps", "SRE"]
        );
    }

    #[test]
    fn page_limit_respects_safety_cap() {
        assert_eq!(effective_page_limit(0), SAFETY_PAGE_CAP);
        assert_eq!(effective_page_limit(5), 5);
        assert_eq!(effective_page_limit(10_000), SAFETY_PAGE_CAP);
    }

    #[test]
    fn cron_expression_runs_daily() {
        let schedule = ScheduleConfig { hour: 9, minute: 30 };
        assert_eq!(schedule.cron_expression(), "0 30 9 * * *");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = CrawlerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "CRAWLER_CONCURRENCY", .. })
        ));
    }

    #[test]
    fn grace_days_rejects_unrepresentable_values() {
        assert_eq!(grace_days(3).unwrap(), chrono::Duration::days(3));
        assert!(matches!(
            grace_days(i64::MAX),
            Err(ConfigError::Invalid { key: "CRAWLER_DELIST_GRACE_DAYS", .. })
        ));
    }

    #[test]
    fn rejects_negative_delist_grace() {
        let config = CrawlerConfig {
            delist: DelistPolicy {
                enabled: true,
                grace: grace_days(-1).unwrap(),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "CRAWLER_DELIST_GRACE_DAYS", .. })
        ));
        assert!(CrawlerConfig::default().validate().is_ok());
    }

    #[test]
    fn storage_override_skips_database_url() {
        let config = CrawlerConfig::from_env_with_storage(Some("file")).unwrap();
        assert!(matches!(config.storage, StorageBackend::File { .. }));
    }

    #[test]
    fn file_backend_by_name_matches_default() {
        assert_eq!(
            StorageBackend::from_name("file", None).unwrap(),
            CrawlerConfig::default().storage
        );
        assert_eq!(
            StorageBackend::from_name("FILE", Some(PathBuf::from("/tmp/out"))).unwrap(),
            StorageBackend::File {
                output_dir: PathBuf::from("/tmp/out")
            }
        );
        assert!(matches!(
            StorageBackend::from_name("mysql", None),
            Err(ConfigError::Invalid { key: "CRAWLER_STORAGE", .. })
        ));
    }
}
