use serde::Serialize;

pub const ENV_IMAGE: &str = "TTYPUB_IMAGE";
pub const ENV_RUN_OPTIONS: &str = "TTYPUB_RUNOPTS";
pub const ENV_COMMAND: &str = "TTYPUB_CMD";
pub const ENV_SESSIONS: &str = "TTYPUB_SESSIONS";
pub const ENV_RUNTIME: &str = "TTYPUB_RUNTIME";
pub const ENV_TITLE: &str = "TTYPUB_TITLE";

/// Session and backend settings read from the process environment.
///
/// Loading never fails. A malformed value is logged at error level and the
/// corresponding default is used instead.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Settings {
    /// Container image every session runs
    pub image: String,
    /// Extra options inserted between `run` flags and the image name
    pub run_options: Vec<String>,
    /// Command override; empty means the image default
    pub command: Vec<String>,
    /// Maximum number of concurrent sessions. `None` = unbounded
    pub capacity: Option<usize>,
    /// Container CLI binary (docker, podman, ...)
    pub runtime: String,
    /// Title of the index page
    pub title: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image: "alpine".to_string(),
            run_options: Vec::new(),
            command: Vec::new(),
            capacity: None,
            runtime: "docker".to_string(),
            title: "tty.pub".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(image) = lookup(ENV_IMAGE) {
            settings.image = image;
        }
        if let Some(runtime) = lookup(ENV_RUNTIME) {
            settings.runtime = runtime;
        }
        if let Some(title) = lookup(ENV_TITLE) {
            settings.title = title;
        }
        if let Some(raw) = lookup(ENV_RUN_OPTIONS) {
            if let Some(options) = parse_json_list(ENV_RUN_OPTIONS, &raw) {
                settings.run_options = options;
            }
        }
        if let Some(raw) = lookup(ENV_COMMAND) {
            if let Some(command) = parse_json_list(ENV_COMMAND, &raw) {
                settings.command = command;
            }
        }
        if let Some(raw) = lookup(ENV_SESSIONS) {
            settings.capacity = parse_capacity(&raw);
        }

        settings
    }
}

/// Parse a JSON array of strings, logging and discarding anything else.
fn parse_json_list(var: &str, raw: &str) -> Option<Vec<String>> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => Some(list),
        Err(e) => {
            tracing::error!(var = %var, error = %e, "Bad ${}, ignoring it", var);
            None
        }
    }
}

fn parse_capacity(raw: &str) -> Option<usize> {
    match raw.trim().parse::<u64>() {
        Ok(limit) => Some(usize::try_from(limit).unwrap_or(usize::MAX)),
        Err(e) => {
            tracing::error!(
                var = %ENV_SESSIONS,
                value = %raw,
                error = %e,
                "Bad ${}, sessions are unbounded",
                ENV_SESSIONS
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[]);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.image, "alpine");
        assert_eq!(settings.runtime, "docker");
        assert_eq!(settings.capacity, None);
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            (ENV_IMAGE, "debian:stable"),
            (ENV_RUN_OPTIONS, r#"["--memory", "64m"]"#),
            (ENV_COMMAND, r#"["/bin/bash", "-l"]"#),
            (ENV_SESSIONS, "3"),
            (ENV_RUNTIME, "podman"),
        ]);
        assert_eq!(settings.image, "debian:stable");
        assert_eq!(settings.run_options, vec!["--memory", "64m"]);
        assert_eq!(settings.command, vec!["/bin/bash", "-l"]);
        assert_eq!(settings.capacity, Some(3));
        assert_eq!(settings.runtime, "podman");
    }

    #[test]
    fn test_malformed_json_falls_back() {
        let settings = load(&[
            (ENV_RUN_OPTIONS, "--memory 64m"),
            (ENV_COMMAND, r#"{"cmd": "sh"}"#),
        ]);
        assert!(settings.run_options.is_empty());
        assert!(settings.command.is_empty());
    }

    #[test]
    fn test_bad_capacity_is_unbounded() {
        assert_eq!(load(&[(ENV_SESSIONS, "many")]).capacity, None);
        assert_eq!(load(&[(ENV_SESSIONS, "-1")]).capacity, None);
        assert_eq!(load(&[(ENV_SESSIONS, "0")]).capacity, Some(0));
    }

    #[test]
    fn test_serializes_for_startup_log() {
        let settings = load(&[(ENV_RUN_OPTIONS, r#"["--rm"]"#)]);
        let json: serde_json::Value = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["image"], "alpine");
        assert_eq!(json["run_options"], serde_json::json!(["--rm"]));
        assert_eq!(json["capacity"], serde_json::Value::Null);
        assert_eq!(json["title"], "tty.pub");
    }
}
