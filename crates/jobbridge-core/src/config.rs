use once_cell::sync::OnceCell;

pub const ENV_MAX_LIVE_ASSOCIATIONS: &str = "JOBBRIDGE_MAX_LIVE_ASSOCIATIONS";
pub const ENV_LOG_PROPERTY_VALUES: &str = "JOBBRIDGE_LOG_PROPERTY_VALUES";
pub const ENV_STRICT_STALE_EVENTS: &str = "JOBBRIDGE_STRICT_STALE_EVENTS";

pub const DEFAULT_MAX_LIVE_ASSOCIATIONS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Registration fails once this many associations are live.
    pub max_live_associations: u32,
    /// Include converted values in trace output.
    pub log_property_values: bool,
    /// Report callbacks for unknown tokens at error level.
    pub strict_stale_events: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_live_associations: DEFAULT_MAX_LIVE_ASSOCIATIONS,
            log_property_values: false,
            strict_stale_events: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_live_associations: env_u32_nonzero(
                ENV_MAX_LIVE_ASSOCIATIONS,
                defaults.max_live_associations,
            ),
            log_property_values: env_bool(ENV_LOG_PROPERTY_VALUES, defaults.log_property_values),
            strict_stale_events: env_bool(ENV_STRICT_STALE_EVENTS, defaults.strict_stale_events),
        }
    }
}

static CONFIG: OnceCell<BridgeConfig> = OnceCell::new();

/// Process-wide configuration, read from the environment on first use.
pub fn config() -> &'static BridgeConfig {
    CONFIG.get_or_init(BridgeConfig::from_env)
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

pub fn env_u32_nonzero(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
