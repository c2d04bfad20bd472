//! Loaded compose project

use super::config::{ComposeConfig, ServiceConfig};
use super::graph::{Graph, GraphBuilder};
use super::parser::ComposeParser;
use super::walker::Direction;
use crate::error::{ConvoyError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// A compose project: name, working directory and its enabled services
#[derive(Debug, Clone)]
pub struct Project {
    /// Normalised project name
    pub name: String,
    /// Directory relative paths resolve against
    pub working_dir: PathBuf,
    /// Enabled services, sorted by name
    pub services: Vec<ServiceConfig>,
}

impl Project {
    /// Load and merge compose files, falling back to the default file names
    pub fn load(
        files: &[PathBuf],
        working_dir: &Path,
        project_name: Option<&str>,
        profiles: &[String],
    ) -> Result<Self> {
        let files: Vec<PathBuf> = if files.is_empty() {
            let found = ComposeParser::find_compose_file(working_dir).ok_or_else(|| {
                ComposeParser::not_found_error(working_dir)
            })?;
            vec![found]
        } else {
            files.to_vec()
        };

        let env: HashMap<String, String> = std::env::vars().collect();
        let paths: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
        let config = ComposeParser::parse_files_with_env(&paths, &env)?;
        for warning in ComposeParser::validate(&config)? {
            tracing::warn!("{}", warning);
        }

        let name = project_name
            .map(str::to_string)
            .or_else(|| config.name.clone())
            .unwrap_or_else(|| {
                working_dir
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("default")
                    .to_string()
            });

        Self::from_config(&name, config, working_dir.to_path_buf(), profiles)
    }

    /// Build a project from a parsed configuration
    pub fn from_config(
        name: &str,
        config: ComposeConfig,
        working_dir: PathBuf,
        profiles: &[String],
    ) -> Result<Self> {
        let name = normalize_project_name(name);
        if name.is_empty() {
            return Err(ConvoyError::InvalidConfig(
                "project name must contain at least one letter or digit".to_string(),
            ));
        }

        let mut enabled = Vec::new();
        let mut disabled = HashSet::new();
        for (service_name, mut service) in config.services {
            service.name = service_name;
            if service.is_enabled(profiles) {
                enabled.push(service);
            } else {
                tracing::debug!("Service {} disabled by profiles", service.name);
                disabled.insert(service.name.clone());
            }
        }

        let known: HashSet<String> = enabled.iter().map(|s| s.name.clone()).collect();
        for service in &mut enabled {
            for dep in service.dependencies() {
                if known.contains(&dep.name) {
                    continue;
                }
                if !dep.required {
                    tracing::debug!(
                        "Ignoring optional dependency {} of {}",
                        dep.name,
                        service.name
                    );
                } else if disabled.contains(&dep.name) {
                    return Err(ConvoyError::Compose(format!(
                        "service '{}' requires '{}', which is disabled by the active profiles",
                        service.name, dep.name
                    )));
                }
            }
            let optional_missing: HashSet<String> = service
                .dependencies()
                .into_iter()
                .filter(|d| !d.required && !known.contains(&d.name))
                .map(|d| d.name)
                .collect();
            service.retain_dependencies(|d| !optional_missing.contains(d));
        }

        enabled.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            name,
            working_dir,
            services: enabled,
        })
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConvoyError::ServiceNotFound(name.to_string()))
    }

    /// Names of all services
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Dependency graph of the project's services
    pub fn graph(&self, lenient: bool) -> Result<Graph<ServiceConfig>> {
        GraphBuilder::new()
            .lenient(lenient)
            .build(self.services.iter().cloned())
    }

    /// Restrict the project to `names` plus everything they need in `direction`.
    ///
    /// Forward keeps the dependencies of the selection (what `start` must bring
    /// up first); backward keeps its dependents (what `stop` must take down
    /// first). An empty selection keeps every service.
    pub fn with_selected(&self, names: &[String], direction: Direction) -> Result<Project> {
        if names.is_empty() {
            return Ok(self.clone());
        }

        let graph = self.graph(true)?;
        let mut keep: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for name in names {
            if !graph.contains(name) {
                return Err(ConvoyError::ServiceNotFound(name.clone()));
            }
            queue.push_back(name.clone());
        }

        while let Some(name) = queue.pop_front() {
            if !keep.insert(name.clone()) {
                continue;
            }
            if let Some(node) = graph.get(&name) {
                for next in direction.prereqs(node) {
                    if !keep.contains(next) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }

        let services = self
            .services
            .iter()
            .filter(|s| keep.contains(&s.name))
            .cloned()
            .map(|mut s| {
                s.retain_dependencies(|d| keep.contains(d));
                s
            })
            .collect();

        Ok(Project {
            name: self.name.clone(),
            working_dir: self.working_dir.clone(),
            services,
        })
    }
}

/// Lowercase, keeping only `[a-z0-9_-]`, and trim leading separators
pub fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .trim_start_matches(&['_', '-'][..])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(yaml: &str, profiles: &[&str]) -> Result<Project> {
        let config = ComposeParser::parse_str(yaml)?;
        let profiles: Vec<String> = profiles.iter().map(|p| p.to_string()).collect();
        Project::from_config("My App", config, PathBuf::from("/tmp"), &profiles)
    }

    const STACK: &str = r#"
services:
  web:
    image: nginx
    depends_on: [api]
  api:
    image: node
    depends_on: [db, cache]
  db:
    image: postgres
  cache:
    image: redis
  worker:
    image: node
    depends_on: [db]
"#;

    #[test]
    fn test_from_config_stamps_names() {
        let p = project(STACK, &[]).unwrap();
        assert_eq!(p.name, "myapp");
        assert_eq!(p.service_names(), vec!["api", "cache", "db", "web", "worker"]);
        assert_eq!(p.service("web").unwrap().name, "web");
        assert!(matches!(p.service("nope"), Err(ConvoyError::ServiceNotFound(_))));
    }

    #[test]
    fn test_with_selected_forward_pulls_in_dependencies() {
        let p = project(STACK, &[]).unwrap();
        let selected = p.with_selected(&["api".to_string()], Direction::Forward).unwrap();
        assert_eq!(selected.service_names(), vec!["api", "cache", "db"]);
    }

    #[test]
    fn test_with_selected_backward_pulls_in_dependents() {
        let p = project(STACK, &[]).unwrap();
        let selected = p.with_selected(&["db".to_string()], Direction::Backward).unwrap();
        assert_eq!(selected.service_names(), vec!["api", "db", "web", "worker"]);

        // api's dependency on cache is outside the selection and must not dangle
        let graph = selected.graph(false).unwrap();
        assert_eq!(graph.get("api").unwrap().dependencies(), ["db"]);
    }

    #[test]
    fn test_profiles_and_optional_dependencies() {
        let yaml = r#"
services:
  app:
    image: app
    depends_on:
      debugger:
        condition: service_started
        required: false
  debugger:
    image: dbg
    profiles: [debug]
"#;
        let p = project(yaml, &[]).unwrap();
        assert_eq!(p.service_names(), vec!["app"]);
        assert!(p.service("app").unwrap().dependencies().is_empty());

        let p = project(yaml, &["debug"]).unwrap();
        assert_eq!(p.service_names(), vec!["app", "debugger"]);
        assert_eq!(p.service("app").unwrap().dependencies().len(), 1);
    }

    #[test]
    fn test_required_dependency_disabled_by_profile() {
        let yaml = r#"
services:
  app:
    image: app
    depends_on: [debugger]
  debugger:
    image: dbg
    profiles: [debug]
"#;
        assert!(matches!(project(yaml, &[]), Err(ConvoyError::Compose(_))));
    }

    #[test]
    fn test_graph_keeps_dependency_declaration_order() {
        let yaml = r#"
services:
  app:
    image: app
    depends_on:
      zeta:
        condition: service_started
      alpha:
        condition: service_started
  zeta:
    image: z
  alpha:
    image: a
"#;
        let graph = project(yaml, &[]).unwrap().graph(false).unwrap();
        assert_eq!(graph.get("app").unwrap().dependencies(), ["zeta", "alpha"]);
    }

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("My Project!"), "myproject");
        assert_eq!(normalize_project_name("-_demo-1"), "demo-1");
    }
}
