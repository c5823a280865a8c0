//! Test definition store
//!
//! Holds the active test list as an immutable snapshot. Reloading swaps the
//! snapshot; runs keep the snapshot they started with.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::command::{parse_command, Command};
use super::document::{Precondition, TestDocument, TestEntry};

/// A named test, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub id: String,
    pub description: String,
    pub commands: Vec<Command>,
    pub requires: Vec<Precondition>,
    pub teardown: Vec<Command>,
}

impl Test {
    /// Number of commands (teardown not included)
    pub fn size(&self) -> usize {
        self.commands.len()
    }
}

/// A problem found while loading a test definition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionError {
    /// 1-based position of the test entry, `None` for document-level errors
    pub position: Option<usize>,
    /// Test id, when it could be read
    pub id: Option<String>,
    pub message: String,
}

impl DefinitionError {
    fn document(message: impl Into<String>) -> Self {
        Self {
            position: None,
            id: None,
            message: message.into(),
        }
    }

    fn entry(position: usize, id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            position: Some(position),
            id,
            message: message.into(),
        }
    }
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.position, &self.id) {
            (Some(pos), Some(id)) => write!(f, "Test {} ({}): {}", pos, id, self.message),
            (Some(pos), None) => write!(f, "Test {}: {}", pos, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Join load errors into the single diagnostic message shown to the user
pub fn join_errors(errors: &[DefinitionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// An ordered set of tests plus the metadata of the file it came from
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    source: Option<PathBuf>,
    version: String,
    tests: Vec<Test>,
}

impl TestSuite {
    /// Parse a test definition document
    ///
    /// Malformed test entries are skipped and returned as errors next to the
    /// suite. A document that cannot be read as a whole yields `Err`.
    pub fn from_yaml(
        content: &str,
        source: Option<PathBuf>,
    ) -> std::result::Result<(Self, Vec<DefinitionError>), DefinitionError> {
        let document: TestDocument = serde_yaml::from_str(content)
            .map_err(|e| DefinitionError::document(format!("Invalid test file: {}", e)))?;

        let mut tests: Vec<Test> = Vec::with_capacity(document.tests.len());
        let mut errors = Vec::new();

        for (i, value) in document.tests.iter().enumerate() {
            let position = i + 1;
            let id_hint = value
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            match build_test(value.clone()) {
                Ok(test) => {
                    if tests.iter().any(|t| t.id == test.id) {
                        errors.push(DefinitionError::entry(
                            position,
                            Some(test.id),
                            "duplicate test id",
                        ));
                    } else {
                        tests.push(test);
                    }
                }
                Err(message) => errors.push(DefinitionError::entry(position, id_hint, message)),
            }
        }

        let suite = Self {
            source,
            version: document.version_text(),
            tests,
        };
        Ok((suite, errors))
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Test> {
        self.tests.get(index)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.id == id)
    }

    /// Position of a test within the suite
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.tests.iter().position(|t| t.id == id)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// File name without extension, used to name suite-wide artifacts
    pub fn base_name(&self) -> String {
        self.source
            .as_deref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tests".to_string())
    }
}

fn build_test(value: serde_yaml::Value) -> std::result::Result<Test, String> {
    let entry: TestEntry = serde_yaml::from_value(value).map_err(|e| e.to_string())?;

    let id = entry.id.trim().to_string();
    if id.is_empty() {
        return Err("test id must not be empty".to_string());
    }

    let parse_all = |lines: &[String]| -> std::result::Result<Vec<Command>, String> {
        lines
            .iter()
            .map(|line| parse_command(line).map_err(|e| e.to_string()))
            .collect()
    };

    Ok(Test {
        id,
        description: entry.description.trim().to_string(),
        commands: parse_all(&entry.commands)?,
        requires: entry.requires,
        teardown: parse_all(&entry.teardown)?,
    })
}

/// The store owning the active test list
#[derive(Debug, Default)]
pub struct TestStore {
    suite: RwLock<Arc<TestSuite>>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a test definition file
    ///
    /// Returns the problems found; an empty list means everything loaded.
    /// Per-test problems drop only the affected tests. When the file cannot
    /// be read or parsed at all, the previously loaded list stays active.
    pub fn load(&self, path: &Path) -> Vec<DefinitionError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read test file");
                return vec![DefinitionError::document(format!(
                    "Failed to read test file '{}': {}",
                    path.display(),
                    e
                ))];
            }
        };
        self.load_str(&content, Some(path.to_path_buf()))
    }

    /// Load test definitions from a string, see [`TestStore::load`]
    pub fn load_str(&self, content: &str, source: Option<PathBuf>) -> Vec<DefinitionError> {
        match TestSuite::from_yaml(content, source) {
            Ok((suite, errors)) => {
                tracing::info!(
                    source = ?suite.source(),
                    tests = suite.len(),
                    errors = errors.len(),
                    "Loaded test definitions"
                );
                *self.suite.write() = Arc::new(suite);
                errors
            }
            Err(e) => {
                tracing::warn!(error = %e, "Test file rejected, keeping previous tests");
                vec![e]
            }
        }
    }

    /// The active test list; stays valid across reloads
    pub fn snapshot(&self) -> Arc<TestSuite> {
        self.suite.read().clone()
    }

    pub fn count(&self) -> usize {
        self.suite.read().len()
    }

    pub fn at(&self, index: usize) -> Option<Test> {
        self.suite.read().get(index).cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Test> {
        self.suite.read().find_by_id(id).cloned()
    }

    pub fn source_filename(&self) -> Option<PathBuf> {
        self.suite.read().source().map(Path::to_path_buf)
    }

    pub fn version(&self) -> String {
        self.suite.read().version().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_TESTS: &str = r#"
version: v1.2
tests:
  - id: T1
    description: Boot check
    commands:
      - wait 10
      - find ECU1 APP1 CTX1 boot complete
      - marker booted
  - id: T2
    description: Single action
    requires: [transport]
    commands:
      - power on
  - id: T3
    commands:
      - check ECU1 APP1 CTX1 alive
    teardown:
      - power off
"#;

    #[test]
    fn test_load_well_formed_document() {
        let store = TestStore::new();
        let errors = store.load_str(THREE_TESTS, Some(PathBuf::from("suites/smoke.yaml")));

        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert_eq!(store.count(), 3);
        assert_eq!(store.version(), "v1.2");
        assert_eq!(store.at(0).unwrap().size(), 3);
        assert_eq!(store.at(1).unwrap().requires, vec![Precondition::Transport]);
        assert_eq!(store.find_by_id("T3").unwrap().teardown.len(), 1);
        assert_eq!(store.find_by_id("T3").unwrap().description, "");
        assert!(store.find_by_id("T9").is_none());
        assert!(store.at(3).is_none());
        assert_eq!(store.snapshot().base_name(), "smoke");
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let content = r#"
tests:
  - id: T1
    commands: [power on]
  - id: BROKEN
    description: commands missing
  - id: T2
    commands: [power off]
  - id: T3
    commands: [marker]
"#;
        let store = TestStore::new();
        let errors = store.load_str(content, None);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].position, Some(2));
        assert_eq!(errors[0].id.as_deref(), Some("BROKEN"));
        assert_eq!(store.count(), 3);
        assert_eq!(
            store.snapshot().tests().iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["T1", "T2", "T3"]
        );
    }

    #[test]
    fn test_invalid_command_and_duplicate_id_are_reported() {
        let content = r#"
tests:
  - id: T1
    commands: [wait forever]
  - id: T2
    commands: [power on]
  - id: T2
    commands: [power off]
"#;
        let store = TestStore::new();
        let errors = store.load_str(content, None);

        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("invalid wait duration"));
        assert!(errors[1].message.contains("duplicate"));
        assert_eq!(store.count(), 1);

        let joined = join_errors(&errors);
        assert_eq!(joined.lines().count(), 2);
        assert!(joined.starts_with("Test 1 (T1):"));
    }

    #[test]
    fn test_document_error_keeps_previous_list() {
        let store = TestStore::new();
        assert!(store.load_str(THREE_TESTS, None).is_empty());
        let before = store.snapshot();

        let errors = store.load_str("tests: [unclosed", None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].position, None);
        assert_eq!(store.count(), 3);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));

        let errors = store.load_str("version: 2\n", None);
        assert_eq!(errors.len(), 1);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn test_load_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("suite.yaml");
        std::fs::write(&path, THREE_TESTS).unwrap();

        let store = TestStore::new();
        assert!(store.load(&path).is_empty());
        let first = store.snapshot();
        assert!(store.load(&path).is_empty());
        let second = store.snapshot();

        assert_eq!(first.tests(), second.tests());
        assert_eq!(store.source_filename(), Some(path));
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let store = TestStore::new();
        store.load_str(THREE_TESTS, None);
        let running = store.snapshot();

        store.load_str("tests:\n  - id: X\n    commands: [power on]\n", None);
        assert_eq!(running.len(), 3);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let store = TestStore::new();
        let errors = store.load(Path::new("/nonexistent/suite.yaml"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Failed to read test file"));
    }

    #[test]
    fn test_numeric_version() {
        let store = TestStore::new();
        store.load_str("version: 3\ntests: []\n", None);
        assert_eq!(store.version(), "3");
        assert_eq!(store.count(), 0);
    }
}
