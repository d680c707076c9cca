use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::enums::OutputFormat;

pub const DEFAULT_PLACEHOLDER: &str = "s3Object";
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 32;

/// Executor settings. Nothing here is read at request time; the executor keeps the copy it was
/// built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectableConfig {
    /// Table name the object query service expects in FROM.
    pub placeholder: String,
    /// Maximum object query calls in flight while dispatching.
    pub dispatch_concurrency: usize,
    pub output_format: OutputFormat,
}

impl Default for SelectableConfig {
    fn default() -> Self {
        Self {
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            output_format: OutputFormat::default(),
        }
    }
}

impl SelectableConfig {
    /// Defaults overridden by `SELECTABLE_*` variables (a `.env` file is honoured).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(p) = lookup("SELECTABLE_PLACEHOLDER") {
            if p.trim().is_empty() {
                warn!("SELECTABLE_PLACEHOLDER is empty, using `{}`", cfg.placeholder);
            } else {
                cfg.placeholder = p.trim().to_string();
            }
        }
        if let Some(raw) = lookup("SELECTABLE_DISPATCH_CONCURRENCY") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.dispatch_concurrency = n,
                _ => warn!("invalid SELECTABLE_DISPATCH_CONCURRENCY `{}`, using {}", raw, cfg.dispatch_concurrency),
            }
        }
        if let Some(raw) = lookup("SELECTABLE_OUTPUT_FORMAT") {
            match raw.parse::<OutputFormat>() {
                Ok(f) => cfg.output_format = f,
                Err(e) => warn!("{}, using {:?}", e, cfg.output_format),
            }
        }
        cfg
    }
}

/// Installs env_logger with this crate at debug level. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_module("selectable", log::LevelFilter::Debug)
        .is_test(cfg!(test))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = SelectableConfig::from_lookup(lookup(&[
            ("SELECTABLE_PLACEHOLDER", "S3Object"),
            ("SELECTABLE_DISPATCH_CONCURRENCY", "4"),
            ("SELECTABLE_OUTPUT_FORMAT", "csv"),
        ]));
        assert_eq!(cfg.placeholder, "S3Object");
        assert_eq!(cfg.dispatch_concurrency, 4);
        assert_eq!(cfg.output_format, OutputFormat::Csv);
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = SelectableConfig::from_lookup(lookup(&[
            ("SELECTABLE_DISPATCH_CONCURRENCY", "0"),
            ("SELECTABLE_OUTPUT_FORMAT", "xml"),
        ]));
        assert_eq!(cfg, SelectableConfig::default());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: SelectableConfig = serde_json::from_str(r#"{"dispatch_concurrency": 8}"#).unwrap();
        assert_eq!(cfg.dispatch_concurrency, 8);
        assert_eq!(cfg.placeholder, DEFAULT_PLACEHOLDER);
    }
}
