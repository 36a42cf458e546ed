use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelSettings;
use crate::preprocess::ResizeFilter;

#[derive(Error, Debug)]
#[error("{name} is invalid ({value:?}): {reason}")]
pub struct ConfigError {
    name: &'static str,
    value: String,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: IpAddr,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub model: ModelSettings,
    pub class_list_path: Option<PathBuf>,
    pub model_url: Option<String>,
    pub class_list_url: Option<String>,
    /// Bearer token sent with artifact downloads.
    pub github_token: Option<String>,
    pub resize_filter: ResizeFilter,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let host = parse("HOST", var("HOST", "0.0.0.0"))?;
        let port = parse("PORT", var("PORT", "5000"))?;
        let body_limit_mb = var("BODY_LIMIT_MB", "16");
        let body_limit_bytes = parse::<usize>("BODY_LIMIT_MB", body_limit_mb.clone())?
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError {
                name: "BODY_LIMIT_MB",
                value: body_limit_mb,
                reason: "too large".to_string(),
            })?;
        let resize_filter = parse("RESIZE_FILTER", var("RESIZE_FILTER", "linear"))?;
        let apply_softmax = parse("MODEL_OUTPUT_SOFTMAX", var("MODEL_OUTPUT_SOFTMAX", "false"))?;

        Ok(Settings {
            host,
            port,
            body_limit_bytes,
            model: ModelSettings {
                path: PathBuf::from(var("MODEL_PATH", "./model/frozen_graph.pb")),
                input_op: var("MODEL_INPUT_OP", "x"),
                output_op: var("MODEL_OUTPUT_OP", "Identity"),
                apply_softmax,
            },
            class_list_path: lookup("CLASS_LIST_PATH").map(PathBuf::from),
            model_url: lookup("MODEL_URL"),
            class_list_url: lookup("CLASS_LIST_URL"),
            github_token: lookup("GITHUB_TOKEN"),
            resize_filter,
        })
    }
}

fn parse<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: ToString,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|err| ConfigError {
        name,
        reason: err.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.host.to_string(), "0.0.0.0");
        assert_eq!(settings.body_limit_bytes, 16 * 1024 * 1024);
        assert_eq!(settings.model.path, PathBuf::from("./model/frozen_graph.pb"));
        assert_eq!(settings.model.input_op, "x");
        assert_eq!(settings.model.output_op, "Identity");
        assert!(!settings.model.apply_softmax);
        assert_eq!(settings.resize_filter, ResizeFilter::Linear);
        assert!(settings.class_list_path.is_none());
        assert!(settings.model_url.is_none());
        assert!(settings.github_token.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let settings = settings(&[
            ("PORT", "8080"),
            ("BODY_LIMIT_MB", "2"),
            ("MODEL_PATH", "/models/simpsons"),
            ("MODEL_OUTPUT_SOFTMAX", "true"),
            ("RESIZE_FILTER", "lanczos3"),
            ("CLASS_LIST_PATH", "/models/classes.txt"),
            ("MODEL_URL", "https://example.com/graph.pb"),
            ("GITHUB_TOKEN", "ghp_token"),
        ])
        .unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.body_limit_bytes, 2 * 1024 * 1024);
        assert_eq!(settings.model.path, PathBuf::from("/models/simpsons"));
        assert!(settings.model.apply_softmax);
        assert_eq!(settings.resize_filter, ResizeFilter::Lanczos3);
        assert_eq!(settings.class_list_path, Some(PathBuf::from("/models/classes.txt")));
        assert_eq!(settings.model_url.as_deref(), Some("https://example.com/graph.pb"));
        assert_eq!(settings.github_token.as_deref(), Some("ghp_token"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = settings(&[("PORT", "99999")]).unwrap_err();
        assert!(err.to_string().starts_with("PORT is invalid"));

        let err = settings(&[("BODY_LIMIT_MB", usize::MAX.to_string().as_str())]).unwrap_err();
        assert!(err.to_string().starts_with("BODY_LIMIT_MB is invalid"));
        assert!(err.to_string().contains("too large"));

        let err = settings(&[("RESIZE_FILTER", "bicubic")]).unwrap_err();
        assert!(err.to_string().contains("unknown resize filter"));
    }
}
