//! Configured projects and the reloadable registry holding them.

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info};

use crate::error::{HookError, Result};
use crate::extract::{Sources, extract_as_string, value_to_string};

/// Payload paths passed to the deploy script when a project lists no `arguments`.
pub const DEFAULT_ARGUMENTS: [&str; 3] = ["head_commit.id", "pusher.name", "pusher.email"];

/// One deployable unit, as read from the projects file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Project {
    /// Identifier used as the last URL path segment
    pub name: String,
    /// Branch that has to be pushed for a deploy to fire
    pub branch: String,
    /// Executable run on deploy
    pub script: String,
    /// Shared secret of the GitHub webhook
    pub secret: String,
    /// Where each script argument comes from, defaults to [`DEFAULT_ARGUMENTS`]
    #[serde(default)]
    pub arguments: Option<Vec<Argument>>,
    /// Run deploys of this project one at a time
    #[serde(default)]
    pub exclusive: bool,
}

impl Project {
    /// The fully qualified ref a push has to target.
    pub fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Builds the deploy argument vector: the script path followed by one
    /// entry per configured argument. Unresolved arguments become empty strings.
    pub fn command_arguments(&self, sources: Sources<'_>) -> Vec<String> {
        let mut args = vec![self.script.clone()];

        let resolve = |argument: &Argument| {
            argument.resolve(sources).unwrap_or_else(|| {
                debug!("Couldn't retrieve argument for {}", argument);
                String::new()
            })
        };

        match &self.arguments {
            Some(arguments) => args.extend(arguments.iter().map(resolve)),
            None => args.extend(
                DEFAULT_ARGUMENTS
                    .iter()
                    .map(|path| resolve(&Argument::Payload(path.to_string()))),
            ),
        }

        args
    }
}

/// A single script argument source, written as `payload.<path>`,
/// `header.<name>` or `query.<name>` in the projects file.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum Argument {
    Payload(String),
    Header(String),
    Query(String),
}

impl Argument {
    pub fn resolve(&self, sources: Sources<'_>) -> Option<String> {
        match self {
            Argument::Payload(path) => extract_as_string(path, sources.payload?),
            // header and query maps are flat, their keys may contain dots
            Argument::Header(name) => sources.headers.get(name).map(value_to_string),
            Argument::Query(name) => sources.query.get(name).map(value_to_string),
        }
    }
}

impl TryFrom<String> for Argument {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let (source, path) = value
            .split_once('.')
            .ok_or_else(|| format!("argument '{}' has no source prefix", value))?;
        if path.is_empty() {
            return Err(format!("argument '{}' has an empty path", value));
        }

        match source {
            "payload" => Ok(Argument::Payload(path.to_string())),
            // header maps are keyed by lowercase names
            "header" => Ok(Argument::Header(path.to_ascii_lowercase())),
            "query" => Ok(Argument::Query(path.to_string())),
            other => Err(format!(
                "unknown argument source '{}', expected payload, header or query",
                other
            )),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Payload(path) => write!(f, "payload.{}", path),
            Argument::Header(path) => write!(f, "header.{}", path),
            Argument::Query(path) => write!(f, "query.{}", path),
        }
    }
}

/// TOML layout of the projects file: a list of `[[project]]` tables.
#[derive(Debug, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    project: Vec<Project>,
}

/// Parses projects file content. Files ending in `.toml` are read as TOML,
/// everything else as a JSON array.
pub fn parse_projects(path: &Path, content: &str) -> Result<Vec<Project>> {
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");

    let parsed = if is_toml {
        toml::from_str::<ProjectsFile>(content)
            .map(|file| file.project)
            .map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Vec<Project>>(content).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| HookError::ConfigParse {
        path: path.to_path_buf(),
        message,
    })
}

fn first_duplicate(projects: &[Project]) -> Option<&str> {
    let mut seen = HashSet::new();
    projects
        .iter()
        .map(|p| p.name.as_str())
        .find(|name| !seen.insert(*name))
}

/// Holds the active project set.
///
/// Readers take a cheap snapshot of the current set, a reload swaps in a
/// fully validated new set under the write lock. A request therefore never
/// observes a half-loaded set.
#[derive(Debug, Default)]
pub struct Registry {
    projects: RwLock<Arc<Vec<Project>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `projects`.
    pub fn with_projects(projects: Vec<Project>) -> Result<Self> {
        let registry = Self::new();
        registry.replace(projects)?;
        Ok(registry)
    }

    /// Reads and validates the projects file, then swaps it in.
    /// On any error the previously active set stays in place.
    pub fn load(&self, path: &Path) -> Result<usize> {
        info!("Loading projects from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| HookError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let projects = parse_projects(path, &content)?;

        self.replace(projects)
    }

    /// [`Registry::load`], logging the outcome instead of returning it.
    pub fn reload(&self, path: &Path) {
        match self.load(path) {
            Ok(count) => info!("Loaded {} project(s) from {}", count, path.display()),
            Err(e) => error!("{}. Keeping the previous projects.", e),
        }
    }

    /// Swaps in `projects` as the active set, unless it contains a duplicate name.
    pub fn replace(&self, projects: Vec<Project>) -> Result<usize> {
        if let Some(name) = first_duplicate(&projects) {
            return Err(HookError::DuplicateProject(name.to_string()));
        }
        for project in &projects {
            info!("Loaded: {}", project.name);
        }

        let count = projects.len();
        let next = Arc::new(projects);
        *self.projects.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(count)
    }

    /// Returns the project named exactly `name`.
    pub fn find(&self, name: &str) -> Option<Project> {
        self.snapshot().iter().find(|p| p.name == name).cloned()
    }

    /// The currently active set.
    pub fn snapshot(&self) -> Arc<Vec<Project>> {
        Arc::clone(&*self.projects.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::io::Write;

    fn project(name: &str) -> Project {
        Project {
            name: name.to_string(),
            branch: "main".to_string(),
            script: format!("/deploy/{}.sh", name),
            secret: "s3cr3t".to_string(),
            arguments: None,
            exclusive: false,
        }
    }

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const SITE_JSON: &str = r#"[
        {"name": "site", "branch": "main", "script": "/deploy/site.sh", "secret": "s3cr3t"},
        {"name": "api", "branch": "release", "script": "/deploy/api.sh", "secret": "other",
         "arguments": ["payload.after", "header.X-GitHub-Delivery", "query.env"], "exclusive": true}
    ]"#;

    #[test]
    fn test_load_json_projects() {
        let file = write_temp(".json", SITE_JSON);
        let registry = Registry::new();

        assert_eq!(registry.load(file.path()).unwrap(), 2);

        let api = registry.find("api").unwrap();
        assert_eq!(api.branch_ref(), "refs/heads/release");
        assert!(api.exclusive);
        assert_eq!(
            api.arguments,
            Some(vec![
                Argument::Payload("after".to_string()),
                Argument::Header("x-github-delivery".to_string()),
                Argument::Query("env".to_string()),
            ])
        );
        assert!(!registry.find("site").unwrap().exclusive);
    }

    #[test]
    fn test_load_toml_projects() {
        let file = write_temp(
            ".toml",
            r#"
            [[project]]
            name = "site"
            branch = "main"
            script = "/deploy/site.sh"
            secret = "s3cr3t"
            "#,
        );
        let registry = Registry::new();

        assert_eq!(registry.load(file.path()).unwrap(), 1);
        assert_eq!(registry.find("site").unwrap().script, "/deploy/site.sh");
    }

    #[test]
    fn test_duplicate_names_keep_previous_set() {
        let registry = Registry::with_projects(vec![project("site")]).unwrap();
        let file = write_temp(
            ".json",
            r#"[
                {"name": "blog", "branch": "main", "script": "/a.sh", "secret": "x"},
                {"name": "blog", "branch": "dev", "script": "/b.sh", "secret": "y"}
            ]"#,
        );

        let err = registry.load(file.path()).unwrap_err();
        assert!(matches!(err, HookError::DuplicateProject(ref name) if name == "blog"));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("site").is_some());
        assert!(registry.find("blog").is_none());
    }

    #[test]
    fn test_malformed_or_missing_file_keeps_previous_set() {
        let registry = Registry::with_projects(vec![project("site")]).unwrap();

        let file = write_temp(".json", r#"[{"name": "broken""#);
        assert!(matches!(
            registry.load(file.path()),
            Err(HookError::ConfigParse { .. })
        ));

        let missing = Path::new("/nonexistent/projects.json");
        assert!(matches!(
            registry.load(missing),
            Err(HookError::ConfigRead { .. })
        ));

        registry.reload(missing);
        assert_eq!(registry.len(), 1);
        assert!(registry.find("site").is_some());
    }

    #[test]
    fn test_first_load_failure_leaves_registry_empty() {
        let registry = Registry::new();
        let file = write_temp(".json", "not json");
        registry.reload(file.path());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_argument_source_is_rejected() {
        let file = write_temp(
            ".json",
            r#"[{"name": "site", "branch": "main", "script": "/a.sh", "secret": "x",
                 "arguments": ["cookie.session"]}]"#,
        );
        let registry = Registry::with_projects(vec![project("site")]).unwrap();
        assert!(matches!(
            registry.load(file.path()),
            Err(HookError::ConfigParse { .. })
        ));
        assert_eq!(registry.find("site").unwrap().script, "/deploy/site.sh");

        assert!(Argument::try_from("payload.".to_string()).is_err());
        assert!(Argument::try_from("payload".to_string()).is_err());
    }

    #[test]
    fn test_find_is_exact_and_case_sensitive() {
        let registry = Registry::with_projects(vec![project("site"), project("api")]).unwrap();
        assert_eq!(registry.find("site").unwrap().name, "site");
        assert!(registry.find("Site").is_none());
        assert!(registry.find("sit").is_none());
        assert!(registry.find("").is_none());
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let registry = Registry::with_projects(vec![project("site")]).unwrap();
        let before = registry.snapshot();

        registry.replace(vec![project("api")]).unwrap();

        assert_eq!(before[0].name, "site");
        assert_eq!(registry.snapshot()[0].name, "api");
    }

    #[test]
    fn test_default_command_arguments() {
        let payload = json!({
            "head_commit": { "id": "abc123" },
            "pusher": { "name": "alice" }
        });
        let empty = Value::Object(Default::default());
        let sources = Sources {
            headers: &empty,
            query: &empty,
            payload: Some(&payload),
        };

        assert_eq!(
            project("site").command_arguments(sources),
            vec!["/deploy/site.sh", "abc123", "alice", ""]
        );

        let no_payload = Sources {
            payload: None,
            ..sources
        };
        assert_eq!(
            project("site").command_arguments(no_payload),
            vec!["/deploy/site.sh", "", "", ""]
        );
    }

    #[test]
    fn test_configured_command_arguments() {
        let payload = json!({ "after": "def456" });
        let headers = json!({ "x-github-delivery": "d-1" });
        let query = json!({ "env": "staging" });
        let mut api = project("api");
        api.arguments = Some(vec![
            Argument::try_from("query.env".to_string()).unwrap(),
            Argument::try_from("header.X-GitHub-Delivery".to_string()).unwrap(),
            Argument::try_from("payload.after".to_string()).unwrap(),
            Argument::try_from("query.missing".to_string()).unwrap(),
        ]);

        let args = api.command_arguments(Sources {
            headers: &headers,
            query: &query,
            payload: Some(&payload),
        });
        assert_eq!(args, vec!["/deploy/api.sh", "staging", "d-1", "def456", ""]);
    }

    #[test]
    fn test_query_and_header_names_with_dots() {
        let headers = json!({ "x-trace.id": "t-9" });
        let query = json!({ "a.b": "dotted", "a": { "b": "nested" } });
        let mut api = project("api");
        api.arguments = Some(vec![
            Argument::try_from("query.a.b".to_string()).unwrap(),
            Argument::try_from("header.X-Trace.Id".to_string()).unwrap(),
        ]);

        let args = api.command_arguments(Sources {
            headers: &headers,
            query: &query,
            payload: None,
        });
        assert_eq!(args, vec!["/deploy/api.sh", "dotted", "t-9"]);
    }
}
