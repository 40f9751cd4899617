use std::env;
use std::str::FromStr;
use tracing::warn;

/// Which appointment store implementation the API wires in at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub server_port: u16,
    pub store_backend: StoreBackend,
    pub business_open_hour: u32,
    pub business_close_hour: u32,
    pub slot_granularity_minutes: i64,
    pub default_duration_minutes: i32,
    pub strict_status_transitions: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            server_port: 3000,
            store_backend: StoreBackend::Memory,
            business_open_hour: 9,
            business_close_hour: 17,
            slot_granularity_minutes: 30,
            default_duration_minutes: 60,
            strict_status_transitions: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            store_backend: defaults.store_backend,
            business_open_hour: env_or("BUSINESS_OPEN_HOUR", defaults.business_open_hour),
            business_close_hour: env_or("BUSINESS_CLOSE_HOUR", defaults.business_close_hour),
            slot_granularity_minutes: env_or(
                "SLOT_GRANULARITY_MINUTES",
                defaults.slot_granularity_minutes,
            ),
            default_duration_minutes: env_or(
                "DEFAULT_APPOINTMENT_DURATION_MINUTES",
                defaults.default_duration_minutes,
            ),
            strict_status_transitions: env::var("APPOINTMENT_STATUS_POLICY")
                .map(|policy| policy.eq_ignore_ascii_case("strict"))
                .unwrap_or(false),
        };

        config.store_backend = match env::var("APPOINTMENT_STORE").ok().as_deref() {
            Some("supabase") => StoreBackend::Supabase,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                warn!("Unknown APPOINTMENT_STORE '{}', falling back to default", other);
                config.default_store_backend()
            }
            None => config.default_store_backend(),
        };

        if config.business_open_hour >= config.business_close_hour || config.business_close_hour > 24 {
            warn!(
                "Invalid business hours {}-{}, using {}-{}",
                config.business_open_hour, config.business_close_hour,
                defaults.business_open_hour, defaults.business_close_hour
            );
            config.business_open_hour = defaults.business_open_hour;
            config.business_close_hour = defaults.business_close_hour;
        }

        if config.slot_granularity_minutes <= 0 {
            warn!("SLOT_GRANULARITY_MINUTES must be positive, using default");
            config.slot_granularity_minutes = defaults.slot_granularity_minutes;
        }

        if !(15..=480).contains(&config.default_duration_minutes) {
            warn!("DEFAULT_APPOINTMENT_DURATION_MINUTES must be within 15-480, using default");
            config.default_duration_minutes = defaults.default_duration_minutes;
        }

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    fn default_store_backend(&self) -> StoreBackend {
        if self.supabase_url.is_empty() || self.supabase_anon_key.is_empty() {
            StoreBackend::Memory
        } else {
            StoreBackend::Supabase
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr>(key: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("{} has invalid value '{}', using default", key, raw);
        default
    })
}
