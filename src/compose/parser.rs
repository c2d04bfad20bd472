//! Compose file parser

use super::config::{ComposeConfig, ServiceConfig};
use crate::error::{ConvoyError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Error for a directory with no compose file
    pub fn not_found_error(dir: &Path) -> ConvoyError {
        ConvoyError::ComposeParse(format!(
            "no compose file found in {} (looked for {})",
            dir.display(),
            DEFAULT_COMPOSE_FILES.join(", ")
        ))
    }

    /// Parse compose file from path, without interpolation
    pub fn parse_file(path: &Path) -> Result<ComposeConfig> {
        Self::parse_file_with_env(path, &HashMap::new())
    }

    /// Parse compose file from path, interpolating `env` first
    pub fn parse_file_with_env(path: &Path, env: &HashMap<String, String>) -> Result<ComposeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvoyError::ComposeParse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let content = interpolate(&content, env)?;
        Self::parse_str(&content)
    }

    /// Parse compose file from string
    pub fn parse_str(content: &str) -> Result<ComposeConfig> {
        serde_yaml::from_str(content)
            .map_err(|e| ConvoyError::ComposeParse(format!("Failed to parse YAML: {}", e)))
    }

    /// Parse and merge several files; later files override earlier ones
    pub fn parse_files_with_env(
        paths: &[&Path],
        env: &HashMap<String, String>,
    ) -> Result<ComposeConfig> {
        let mut config = ComposeConfig::default();

        for path in paths {
            tracing::debug!("Loading compose file {}", path.display());
            let file_config = Self::parse_file_with_env(path, env)?;
            config = Self::merge_configs(config, file_config);
        }

        Ok(config)
    }

    /// Merge two compose configurations
    pub fn merge_configs(base: ComposeConfig, overlay: ComposeConfig) -> ComposeConfig {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }

        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            match result.services.get_mut(&name) {
                Some(existing) => merge_service(existing, service),
                None => {
                    result.services.insert(name, service);
                }
            }
        }

        for (name, network) in overlay.networks {
            result.networks.insert(name, network);
        }

        for (name, volume) in overlay.volumes {
            result.volumes.insert(name, volume);
        }

        result
    }

    /// Validate compose configuration, returning warnings
    ///
    /// Dependency references are checked when the dependency graph is built.
    pub fn validate(config: &ComposeConfig) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        for (name, service) in &config.services {
            if service.image.is_none() && service.build.is_none() {
                return Err(ConvoyError::ComposeParse(format!(
                    "Service '{}' must have either 'image' or 'build' specified",
                    name
                )));
            }

            if service.deploy.as_ref().and_then(|d| d.replicas) == Some(0) {
                warnings.push(format!("Service '{}' has 0 replicas and will not run", name));
            }

            for net in service.networks.iter().flatten() {
                if net != "default" && !config.networks.contains_key(net) {
                    warnings.push(format!(
                        "Service '{}' references undefined network '{}' (will be created)",
                        name, net
                    ));
                }
            }
        }

        Ok(warnings)
    }
}

/// Overlay fields set in `overlay` onto `base`
fn merge_service(base: &mut ServiceConfig, overlay: ServiceConfig) {
    macro_rules! take {
        ($($field:ident),* $(,)?) => {
            $(if overlay.$field.is_some() {
                base.$field = overlay.$field;
            })*
        };
    }

    take!(
        image,
        build,
        command,
        entrypoint,
        container_name,
        hostname,
        environment,
        ports,
        volumes,
        networks,
        depends_on,
        deploy,
        healthcheck,
        labels,
        restart,
        working_dir,
        user,
        privileged,
        profiles,
        pull_policy,
    );
}

/// Substitute `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}`,
/// `${VAR:?message}` and `${VAR?message}`; `$$` is a literal `$`.
///
/// Unset variables without a default become empty strings.
pub fn interpolate(content: &str, env: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(
        r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?[-?])([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))",
    )
    .map_err(|e| ConvoyError::Internal(format!("invalid interpolation pattern: {}", e)))?;

    let mut errors = Vec::new();
    let result = re.replace_all(content, |caps: &Captures| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }
        if let Some(var) = caps.get(5) {
            return lookup(var.as_str(), env);
        }

        let var = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let value = env.get(var);
        let arg = caps.get(4).map(|m| m.as_str()).unwrap_or_default();

        match caps.get(3).map(|m| m.as_str()) {
            None => lookup(var, env),
            Some(op) => {
                let unset = match op {
                    ":-" | ":?" => value.map_or(true, |v| v.is_empty()),
                    _ => value.is_none(),
                };
                if !unset {
                    return value.cloned().unwrap_or_default();
                }
                if op.ends_with('?') {
                    errors.push(format!("required variable {} is missing: {}", var, arg));
                    String::new()
                } else {
                    arg.to_string()
                }
            }
        }
    });

    if let Some(message) = errors.into_iter().next() {
        return Err(ConvoyError::InvalidConfig(message));
    }
    Ok(result.into_owned())
}

fn lookup(var: &str, env: &HashMap<String, String>) -> String {
    match env.get(var) {
        Some(value) => value.clone(),
        None => {
            tracing::warn!("The \"{}\" variable is not set. Defaulting to a blank string.", var);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_simple_compose() {
        let yaml = r#"
version: "3.8"
services:
  web:
    image: nginx:latest
    ports:
      - "80:80"
  db:
    image: postgres:13
    environment:
      POSTGRES_PASSWORD: secret
"#;

        let config = ComposeParser::parse_str(yaml).unwrap();
        assert_eq!(config.services.len(), 2);
        assert!(config.services.contains_key("web"));
        assert!(config.services.contains_key("db"));
    }

    #[test]
    fn test_validate_missing_image() {
        let yaml = r#"
services:
  web:
    ports:
      - "80:80"
"#;

        let config = ComposeParser::parse_str(yaml).unwrap();
        let result = ComposeParser::validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_interpolate() {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("EMPTY".to_string(), String::new());

        assert_eq!(interpolate("nginx:${TAG}", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("nginx:$TAG", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("${MISSING:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate("${EMPTY:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate("${EMPTY-x}", &env).unwrap(), "");
        assert_eq!(interpolate("${MISSING}", &env).unwrap(), "");
        assert_eq!(interpolate("cost: $$5", &env).unwrap(), "cost: $5");
        assert!(matches!(
            interpolate("${MISSING:?set it}", &env),
            Err(ConvoyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_merge_overrides_and_adds() {
        let base = ComposeParser::parse_str(
            r#"
services:
  web:
    image: nginx:1
    depends_on: [db]
  db:
    image: postgres
"#,
        )
        .unwrap();
        let overlay = ComposeParser::parse_str(
            r#"
name: demo
services:
  web:
    image: nginx:2
  cache:
    image: redis
"#,
        )
        .unwrap();

        let merged = ComposeParser::merge_configs(base, overlay);
        assert_eq!(merged.name.as_deref(), Some("demo"));
        assert_eq!(merged.services.len(), 3);
        let web = &merged.services["web"];
        assert_eq!(web.image.as_deref(), Some("nginx:2"));
        assert!(web.depends_on.is_some());
    }

    #[test]
    fn test_parse_files_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "services:\n  web:\n    image: nginx:${{TAG:-latest}}").unwrap();

        assert_eq!(ComposeParser::find_compose_file(dir.path()), Some(path.clone()));

        let config = ComposeParser::parse_files_with_env(&[path.as_path()], &HashMap::new()).unwrap();
        assert_eq!(config.services["web"].image.as_deref(), Some("nginx:latest"));
    }
}
