//! Language profiles for compilation and execution
//!
//! Profiles are read once at startup, either from the embedded
//! `files/languages.toml` or from an override file, and never change
//! afterwards. The registry is shared read-only between executions.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::entrypoint::{Entrypoint, EntrypointStrategy};

/// Placeholder for the source file name in command templates
pub const SOURCE_PLACEHOLDER: &str = "{source}";
/// Placeholder for the resolved entrypoint in command templates
pub const ENTRYPOINT_PLACEHOLDER: &str = "{entrypoint}";
/// Stem of the source file when the language has no entrypoint rule
pub const SOURCE_STEM: &str = "Main";

#[derive(Debug, Error)]
pub enum LanguageConfigError {
    #[error("Failed to read language config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid language config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid profile for {language}: {reason}")]
    Invalid { language: String, reason: String },
    #[error("Language name {0} is defined more than once")]
    Duplicate(String),
}

/// Configuration for a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    /// Canonical identifier (e.g., "python")
    pub id: String,
    /// Container image the code runs in
    pub image: String,
    /// Source file extension including the dot (e.g., ".py")
    pub extension: String,
    /// Compile command template (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// How the entrypoint is derived from the source
    pub entrypoint: EntrypointStrategy,
}

impl LanguageProfile {
    /// Source file name used when no entrypoint rule renames it
    pub fn default_source_file(&self) -> String {
        format!("{}{}", SOURCE_STEM, self.extension)
    }

    pub fn requires_compile(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Compile argv with placeholders substituted
    pub fn compile_argv(&self, entrypoint: &Entrypoint) -> Option<Vec<String>> {
        self.compile_command
            .as_ref()
            .map(|template| expand(template, entrypoint))
    }

    /// Run argv with placeholders substituted
    pub fn run_argv(&self, entrypoint: &Entrypoint) -> Vec<String> {
        expand(&self.run_command, entrypoint)
    }

    fn validate(&self) -> Result<(), LanguageConfigError> {
        let invalid = |reason: &str| LanguageConfigError::Invalid {
            language: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.image.is_empty() || self.image.contains(char::is_whitespace) {
            return Err(invalid("image must be a single non-empty name"));
        }
        if !self.extension.starts_with('.') || self.extension.contains('/') {
            return Err(invalid("extension must start with '.' and contain no '/'"));
        }
        if self.run_command.is_empty() {
            return Err(invalid("run_command is empty"));
        }
        if matches!(&self.compile_command, Some(cmd) if cmd.is_empty()) {
            return Err(invalid("compile_command is empty"));
        }

        let uses_entrypoint = self
            .run_command
            .iter()
            .chain(self.compile_command.iter().flatten())
            .any(|arg| arg.contains(ENTRYPOINT_PLACEHOLDER));
        if uses_entrypoint && self.entrypoint == EntrypointStrategy::None {
            return Err(invalid(
                "{entrypoint} requires an entrypoint strategy other than none",
            ));
        }

        Ok(())
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLanguageProfile {
    image: String,
    extension: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    entrypoint: EntrypointStrategy,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Immutable lookup table from language name (or alias) to profile
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
    index: HashMap<String, usize>,
}

impl LanguageRegistry {
    /// Load the profiles shipped with the worker
    pub fn builtin() -> Result<Self, LanguageConfigError> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    /// Load profiles from a TOML file on disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LanguageConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LanguageConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LanguageConfigError> {
        let raw_profiles: HashMap<String, RawLanguageProfile> = toml::from_str(content)?;
        let mut raw_profiles: Vec<_> = raw_profiles.into_iter().collect();
        raw_profiles.sort_by(|a, b| a.0.cmp(&b.0));

        let mut profiles = Vec::with_capacity(raw_profiles.len());
        let mut index = HashMap::new();

        for (name, raw) in raw_profiles {
            let profile = LanguageProfile {
                id: name.to_lowercase(),
                image: raw.image,
                extension: raw.extension,
                compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
                run_command: into_command(&raw.run_command),
                entrypoint: raw.entrypoint,
            };
            profile.validate()?;

            let slot = profiles.len();
            for key in std::iter::once(profile.id.clone())
                .chain(raw.aliases.iter().map(|alias| alias.to_lowercase()))
            {
                if index.insert(key.clone(), slot).is_some() {
                    return Err(LanguageConfigError::Duplicate(key));
                }
            }
            profiles.push(profile);
        }

        Ok(Self { profiles, index })
    }

    /// Get a language profile by name or alias (case-insensitive)
    pub fn lookup(&self, language: &str) -> Option<&LanguageProfile> {
        self.index
            .get(&language.to_lowercase())
            .map(|&slot| &self.profiles[slot])
    }

    /// Canonical identifiers of all supported languages, sorted
    pub fn supported_languages(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

/// Substitute placeholders argument by argument, so a substituted value
/// always stays a single argument
fn expand(template: &[String], entrypoint: &Entrypoint) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace(SOURCE_PLACEHOLDER, &entrypoint.source_file)
                .replace(ENTRYPOINT_PLACEHOLDER, &entrypoint.name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[c]
image = "gcc:latest"
extension = ".c"
compile_command = "gcc {{source}} -o output"
run_command = "./output"

[python]
image = "python:3.10"
extension = ".py"
run_command = "python3 {{source}}"
aliases = ["py", "Python3"]
"#
        )
        .unwrap();
        file
    }

    #[test]
    fn test_load_languages() {
        let config_file = create_test_config();
        let registry = LanguageRegistry::from_file(config_file.path()).unwrap();

        assert_eq!(registry.supported_languages(), vec!["c", "python"]);
        assert!(registry.lookup("c").unwrap().requires_compile());
        assert_eq!(registry.lookup("PY").unwrap().id, "python");
        assert_eq!(registry.lookup("python3").unwrap().id, "python");
    }

    #[test]
    fn test_builtin_languages() {
        let registry = LanguageRegistry::builtin().unwrap();
        let supported = registry.supported_languages();

        for id in [
            "c",
            "cpp",
            "go",
            "java",
            "javascript",
            "perl",
            "php",
            "python",
            "ruby",
            "rust",
            "swift",
        ] {
            assert!(supported.contains(&id), "missing builtin language {}", id);
        }
        assert_eq!(
            registry.lookup("java").unwrap().entrypoint,
            EntrypointStrategy::ExtractPublicClassName
        );
        assert!(!registry.lookup("ruby").unwrap().requires_compile());
    }

    #[test]
    fn test_unknown_language() {
        let registry = LanguageRegistry::builtin().unwrap();
        assert!(registry.lookup("brainfuck").is_none());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn test_argv_expansion_keeps_single_arguments() {
        let registry = LanguageRegistry::builtin().unwrap();
        let java = registry.lookup("java").unwrap();
        let entrypoint = Entrypoint {
            source_file: "Odd Name.java".to_string(),
            name: "Odd Name".to_string(),
        };

        assert_eq!(
            java.compile_argv(&entrypoint),
            Some(vec!["javac".to_string(), "Odd Name.java".to_string()])
        );
        assert_eq!(
            java.run_argv(&entrypoint),
            vec!["java".to_string(), "Odd Name".to_string()]
        );
    }

    #[test]
    fn test_compiled_run_command_ignores_source() {
        let registry = LanguageRegistry::builtin().unwrap();
        let cpp = registry.lookup("c++").unwrap();
        let entrypoint = Entrypoint {
            source_file: cpp.default_source_file(),
            name: cpp.default_source_file(),
        };

        assert_eq!(cpp.run_argv(&entrypoint), vec!["./output".to_string()]);
        assert_eq!(
            cpp.compile_argv(&entrypoint).unwrap(),
            vec!["g++", "Main.cpp", "-o", "output"]
        );
    }

    #[test]
    fn test_entrypoint_placeholder_requires_strategy() {
        let content = r#"
[kotlin]
image = "kotlin:latest"
extension = ".kt"
run_command = "kotlin {entrypoint}"
"#;
        let err = LanguageRegistry::from_toml_str(content).unwrap_err();
        assert!(matches!(err, LanguageConfigError::Invalid { .. }));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let content = r#"
[python]
image = "python:3.10"
extension = ".py"
run_command = "python3 {source}"
aliases = ["py"]

[pypy]
image = "pypy:3"
extension = ".py"
run_command = "pypy3 {source}"
aliases = ["py"]
"#;
        let err = LanguageRegistry::from_toml_str(content).unwrap_err();
        assert!(matches!(err, LanguageConfigError::Duplicate(name) if name == "py"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = r#"
[python]
image = "python:3.10"
extension = ".py"
run_command = "python3 {source}"
network = "host"
"#;
        assert!(matches!(
            LanguageRegistry::from_toml_str(content),
            Err(LanguageConfigError::Parse(_))
        ));
    }
}
