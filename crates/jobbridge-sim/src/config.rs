use std::time::Duration;

use jobbridge_core::config::env_u64;

pub const ENV_SIM_PROGRESS_EVENTS: &str = "JOBBRIDGE_SIM_PROGRESS_EVENTS";
pub const ENV_SIM_STEP_MS: &str = "JOBBRIDGE_SIM_STEP_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Progress events fired before completion, unless a script says otherwise.
    pub progress_events: u32,
    /// Pause between consecutive events on a job's worker thread.
    pub step_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            progress_events: 1,
            step_delay: Duration::from_millis(1),
        }
    }
}

impl SimConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        // Zero progress events is a valid setting, so this does not go
        // through the nonzero parser.
        let progress_events = match std::env::var(ENV_SIM_PROGRESS_EVENTS) {
            Ok(v) => v.trim().parse::<u32>().unwrap_or(defaults.progress_events),
            Err(_) => defaults.progress_events,
        };
        let step_ms = env_u64(ENV_SIM_STEP_MS, defaults.step_delay.as_millis() as u64);
        Self {
            progress_events,
            step_delay: Duration::from_millis(step_ms),
        }
    }

    pub fn quiet() -> Self {
        Self {
            progress_events: 0,
            step_delay: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_reads_overrides_and_falls_back() {
        let _g = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var(ENV_SIM_PROGRESS_EVENTS, "0");
        std::env::set_var(ENV_SIM_STEP_MS, "25");
        let cfg = SimConfig::from_env();
        assert_eq!(cfg.progress_events, 0);
        assert_eq!(cfg.step_delay, Duration::from_millis(25));

        std::env::set_var(ENV_SIM_PROGRESS_EVENTS, "lots");
        std::env::remove_var(ENV_SIM_STEP_MS);
        let cfg = SimConfig::from_env();
        assert_eq!(cfg, SimConfig::default());
        std::env::remove_var(ENV_SIM_PROGRESS_EVENTS);
    }
}
