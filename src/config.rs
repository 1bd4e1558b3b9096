use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::geo::LatLng;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub fleet_url: String,
    pub notifications_url: String,
    pub location_url: String,
    pub poll_interval: Duration,
    pub notification_interval: Duration,
    pub request_timeout: Duration,
    pub port: u16,
    /// Vehicle this process reports its own position for. Reporting is off
    /// when unset.
    pub report_bus_id: Option<String>,
    /// Vehicles unseen for this long are marked offline. Off when unset.
    pub stale_after: Option<Duration>,
    pub csrf_token: Option<String>,
    pub simulation: Simulation,
}

/// Parameters for the simulated position source.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub center: LatLng,
    pub radius_deg: f64,
    pub speed_kmh: f64,
    pub period: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let api_base = env_string("API_BASE_URL", "http://localhost:8000/api");
        let fleet_url = env_string("FLEET_URL", &format!("{api_base}/buses/locations/"));
        let notifications_url =
            env_string("NOTIFICATIONS_URL", &format!("{api_base}/notifications/unread/"));
        let location_url = env_string("LOCATION_URL", &format!("{api_base}/buses/update-location/"));

        let poll_interval = env_millis("POLL_INTERVAL_MS", 5_000);
        let notification_interval = env_millis("NOTIFICATION_INTERVAL_MS", 30_000);
        let request_timeout = env_millis("REQUEST_TIMEOUT_MS", 10_000);
        let port = env_parse("PORT", 3000);

        let report_bus_id = env_opt("REPORT_BUS_ID");
        let stale_after = stale_after(env_opt("STALE_AFTER_SECS"));
        let csrf_token = env_opt("CSRF_TOKEN");

        let simulation = Simulation {
            center: LatLng::new(env_parse("SIM_CENTER_LAT", 23.8859), env_parse("SIM_CENTER_LNG", 90.3971)),
            radius_deg: parse_checked("SIM_RADIUS_DEG", env_opt("SIM_RADIUS_DEG"), 0.015, is_positive),
            speed_kmh: parse_checked("SIMULATED_SPEED_KMH", env_opt("SIMULATED_SPEED_KMH"), 30.0, is_positive),
            period: env_millis("SIM_PERIOD_MS", 1_000),
        };

        Self {
            fleet_url,
            notifications_url,
            location_url,
            poll_interval,
            notification_interval,
            request_timeout,
            port,
            report_bus_id,
            stale_after,
            csrf_token,
            simulation,
        }
    }

    /// The reporter shares the fleet polling interval as its threshold.
    pub const fn report_threshold(&self) -> Duration {
        self.poll_interval
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr + Display + Copy>(key: &str, default: T) -> T {
    parse_checked(key, env_opt(key), default, |_| true)
}

/// Non-zero millisecond duration.
fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(parse_checked(key, env_opt(key), default, |ms| *ms > 0))
}

fn is_positive(value: &f64) -> bool {
    value.is_finite() && *value > 0.0
}

/// Sweep threshold in seconds. Unset, zero or unparsable turns the sweep off.
fn stale_after(raw: Option<String>) -> Option<Duration> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!("invalid STALE_AFTER_SECS={raw}, staleness sweep disabled");
            None
        }
    }
}

fn parse_checked<T: FromStr + Display + Copy>(
    key: &str,
    raw: Option<String>,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!("invalid {key}={raw}, using {default}");
            default
        }
    }
}
