use calendar_types::YearMonth;
use chrono_tz::Tz;
use clap::builder::BoolishValueParser;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::calendar_client::DEFAULT_BASE_URL;
use crate::error::ConfigError;
use crate::identity::{ProxySource, Rotation, WEBSHARE_LIST_URL};
use crate::monitor::{Clock, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "ticket-monitor")]
#[command(about = "Watch the museum ticket calendar and announce newly available dates")]
#[command(
    long_about = "Polls the museum's ticket calendar for one month and sends a single \
    notification for every date that becomes available.\n\n\
    Every option can also be set through the environment or a .env file."
)]
pub struct Args {
    /// Year to watch. Defaults to the current year.
    #[arg(long, env = "TARGET_YEAR")]
    pub year: Option<i32>,

    /// Month to watch (1-12). Defaults to the current month.
    #[arg(long, env = "TARGET_MONTH")]
    pub month: Option<u32>,

    /// Seconds to wait between checks. 20-60 is a sensible range.
    #[arg(
        short,
        long,
        env = "MONITOR_INTERVAL",
        default_value_t = 20,
        value_name = "SECONDS"
    )]
    pub interval: u64,

    /// Ticketing site to poll
    #[arg(long, env = "MUSEUM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Discord webhook for alerts. Without it alerts are only logged.
    #[arg(long, env = "DISCORD_WEBHOOK_URL", hide_env_values = true)]
    pub webhook_url: Option<String>,

    /// Load proxies from the Webshare API instead of the proxies file
    #[arg(long, env = "USE_WEBSHARE", value_parser = BoolishValueParser::new())]
    pub use_webshare: bool,

    #[arg(long, env = "API_KEY_WEBSHARE", hide_env_values = true)]
    pub webshare_api_key: Option<String>,

    #[arg(long, env = "WEBSHARE_LIST_URL", default_value = WEBSHARE_LIST_URL)]
    pub webshare_url: String,

    /// File with one `ip:port:username:password` per line
    #[arg(long, env = "PROXIES_FILE", default_value = "proxies.txt")]
    pub proxies_file: PathBuf,

    /// How a proxy is picked for each request attempt
    #[arg(long, env = "PROXY_ROTATION", value_enum, default_value_t = Rotation::Random)]
    pub rotation: Rotation,

    /// Request attempts per check, each through a fresh proxy
    #[arg(long, env = "FETCH_ATTEMPTS", default_value_t = 1)]
    pub attempts: u32,

    /// Per-request timeout
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30, value_name = "SECONDS")]
    pub timeout: u64,

    /// IANA time zone deciding what "today" is, e.g. Asia/Tokyo. Defaults to
    /// the host's local zone.
    #[arg(long, env = "MONITOR_TIMEZONE")]
    pub timezone: Option<String>,

    /// Also write a daily-rotated log file into this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Run a single check and exit
    #[arg(long)]
    pub once: bool,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub target: YearMonth,
    pub interval: Duration,
    pub base_url: String,
    pub webhook_url: Option<String>,
    pub proxy_source: ProxySource,
    pub rotation: Rotation,
    pub attempts: u32,
    pub request_timeout: Duration,
    pub timezone: Option<Tz>,
    pub once: bool,
}

impl MonitorConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let timezone = args
            .timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
            })
            .transpose()?;

        let current = YearMonth::of(SystemClock::new(timezone).today());
        let target = YearMonth::new(
            args.year.unwrap_or(current.year()),
            args.month.unwrap_or(current.month()),
        )?;

        if args.interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if !(20..=60).contains(&args.interval) {
            tracing::warn!(
                "Poll interval of {}s is outside the recommended 20-60s range",
                args.interval
            );
        }

        if args.attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        match reqwest::Url::parse(&args.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: args.base_url.clone(),
                    reason: format!("unsupported scheme {}", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: args.base_url.clone(),
                    reason: e.to_string(),
                })
            }
        }

        let proxy_source = if args.use_webshare {
            let api_key = args
                .webshare_api_key
                .clone()
                .filter(|key| !key.trim().is_empty())
                .ok_or(ConfigError::MissingWebshareKey)?;
            ProxySource::Webshare {
                url: args.webshare_url.clone(),
                api_key,
                retry_delay: Duration::from_secs(2),
            }
        } else {
            ProxySource::File(args.proxies_file.clone())
        };

        Ok(Self {
            target,
            interval: Duration::from_secs(args.interval),
            base_url: args.base_url.clone(),
            webhook_url: args.webhook_url.clone().filter(|url| !url.trim().is_empty()),
            proxy_source,
            rotation: args.rotation,
            attempts: args.attempts,
            request_timeout: Duration::from_secs(args.timeout),
            timezone,
            once: args.once,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::Mutex;

    // Parsing reads the process environment; tests that set variables hold this
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["ticket-monitor", "--year", "2025", "--month", "11"];
        argv.extend_from_slice(extra);
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        Args::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_use_webshare_accepts_common_spellings() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let argv = ["ticket-monitor", "--year", "2025", "--month", "11"];
        for (value, expected) in [
            ("False", false),
            ("True", true),
            ("1", true),
            ("0", false),
            ("true", true),
        ] {
            std::env::set_var("USE_WEBSHARE", value);
            let parsed = Args::try_parse_from(argv);
            std::env::remove_var("USE_WEBSHARE");
            let args = parsed.unwrap_or_else(|e| panic!("USE_WEBSHARE={value}: {e}"));
            assert_eq!(args.use_webshare, expected, "USE_WEBSHARE={value}");
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_explicit_target_and_interval() {
        let config = MonitorConfig::from_args(&parse(&["--interval", "45"])).unwrap();
        assert_eq!(config.target, YearMonth::new(2025, 11).unwrap());
        assert_eq!(config.interval, Duration::from_secs(45));
    }

    #[test]
    fn test_invalid_month_rejected() {
        let mut args = parse(&[]);
        args.month = Some(13);
        let err = MonitorConfig::from_args(&args).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMonth(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = MonitorConfig::from_args(&parse(&["--interval", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = MonitorConfig::from_args(&parse(&["--attempts", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroAttempts));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let err = MonitorConfig::from_args(&parse(&["--timezone", "Mars/Olympus"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimezone(_)));

        let config = MonitorConfig::from_args(&parse(&["--timezone", "Asia/Tokyo"])).unwrap();
        assert_eq!(config.timezone, Some(chrono_tz::Asia::Tokyo));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let err = MonitorConfig::from_args(&parse(&["--base-url", "ftp://example.com"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));

        let err = MonitorConfig::from_args(&parse(&["--base-url", "not a url"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_webshare_requires_api_key() {
        let mut args = parse(&["--use-webshare"]);
        args.webshare_api_key = None;
        let err = MonitorConfig::from_args(&args).unwrap_err();
        assert!(matches!(err, ConfigError::MissingWebshareKey));

        args.webshare_api_key = Some("key".to_string());
        let config = MonitorConfig::from_args(&args).unwrap();
        assert!(matches!(config.proxy_source, ProxySource::Webshare { ref api_key, .. } if api_key == "key"));
    }

    #[test]
    fn test_proxy_file_used_without_webshare() {
        let mut args = parse(&["--proxies-file", "/etc/monitor/proxies.txt"]);
        args.use_webshare = false;
        let config = MonitorConfig::from_args(&args).unwrap();
        assert!(
            matches!(config.proxy_source, ProxySource::File(ref path) if path == &PathBuf::from("/etc/monitor/proxies.txt"))
        );
    }

    #[test]
    fn test_blank_webhook_treated_as_missing() {
        let mut args = parse(&[]);
        args.webhook_url = Some("  ".to_string());
        let config = MonitorConfig::from_args(&args).unwrap();
        assert!(config.webhook_url.is_none());
    }
}
