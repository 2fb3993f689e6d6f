//! Tracing subscriber setup.

use std::collections::BTreeMap;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Override per component: crate name → level
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Build from `component=level` pairs; malformed pairs are ignored.
    pub fn new(level: &str, components: &[String], json: bool) -> Self {
        let components = components
            .iter()
            .filter_map(|pair| {
                let (component, level) = pair.split_once('=')?;
                let (component, level) = (component.trim(), level.trim());
                (!component.is_empty() && !level.is_empty())
                    .then(|| (component.to_string(), level.to_string()))
            })
            .collect();
        Self {
            level: level.trim().to_string(),
            components,
            json,
        }
    }

    /// `"info,carbonindex_evm=debug"` style directive string.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over `config`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
