use std::time::Duration;

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Runtime knobs, read once from the environment when the layer loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// `LATENCY_LAYER_DISABLE`: pass device-level calls straight through.
    pub disabled: bool,
    /// `LATENCY_LAYER_REPORT_INTERVAL_MS`
    pub report_interval: Duration,
    /// `LATENCY_LAYER_LOW_LATENCY`: treat low latency as requested even if
    /// the application never enables sleep mode.
    pub force_low_latency: bool,
    /// `LATENCY_LAYER_PREDICTION`
    pub prediction: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            report_interval: DEFAULT_REPORT_INTERVAL,
            force_low_latency: false,
            prediction: false,
        }
    }
}

impl LayerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let report_interval = match lookup("LATENCY_LAYER_REPORT_INTERVAL_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    log::warn!(
                        "Latency layer: bad LATENCY_LAYER_REPORT_INTERVAL_MS={raw:?}, using {:?}",
                        defaults.report_interval
                    );
                    defaults.report_interval
                }
            },
            None => defaults.report_interval,
        };

        Self {
            disabled: flag(&lookup, "LATENCY_LAYER_DISABLE"),
            report_interval,
            force_low_latency: flag(&lookup, "LATENCY_LAYER_LOW_LATENCY"),
            prediction: flag(&lookup, "LATENCY_LAYER_PREDICTION"),
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") | Some("0") => false,
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some(other) => {
            log::warn!("Latency layer: unrecognised value {key}={other:?}, treating as off");
            false
        }
    }
}
