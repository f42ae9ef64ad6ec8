//! Entrypoint resolution
//!
//! Some languages cannot run the source file directly: the JVM needs the
//! name of the public class, and javac requires the file to be named after
//! it. Each such rule is a separate `EntrypointStrategy`, so the executor
//! never special-cases a language.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::languages::LanguageProfile;

/// How the runnable artifact name is derived from the submitted source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrypointStrategy {
    /// Run the source file as written
    #[default]
    None,
    /// Use the identifier of the first `public class` declaration
    ExtractPublicClassName,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntrypointError {
    #[error("Public class not found in {language} code")]
    MissingEntrypoint { language: String },
}

/// Names resolved for one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    /// File name the source is written to inside the workspace
    pub source_file: String,
    /// Value substituted for `{entrypoint}` in command templates
    pub name: String,
}

/// Resolve the source file name and entrypoint for `code`.
///
/// Fails with `MissingEntrypoint` before anything touches the sandbox.
pub fn resolve(profile: &LanguageProfile, code: &str) -> Result<Entrypoint, EntrypointError> {
    match profile.entrypoint {
        EntrypointStrategy::None => {
            let source_file = profile.default_source_file();
            Ok(Entrypoint {
                name: source_file.clone(),
                source_file,
            })
        }
        EntrypointStrategy::ExtractPublicClassName => {
            let class_name = extract_public_class_name(code).ok_or_else(|| {
                EntrypointError::MissingEntrypoint {
                    language: profile.id.clone(),
                }
            })?;
            Ok(Entrypoint {
                source_file: format!("{}{}", class_name, profile.extension),
                name: class_name,
            })
        }
    }
}

fn public_class_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\bpublic\s+(?:(?:final|abstract|static|strictfp|sealed)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .expect("public class pattern is valid")
    })
}

fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("comment pattern is valid"))
}

/// Find the first public class name, ignoring commented-out declarations
fn extract_public_class_name(code: &str) -> Option<String> {
    let stripped = comment_pattern().replace_all(code, " ");
    public_class_pattern()
        .captures(&stripped)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageRegistry;

    fn profile(id: &str) -> LanguageProfile {
        LanguageRegistry::builtin()
            .unwrap()
            .lookup(id)
            .unwrap()
            .clone()
    }

    #[test]
    fn test_plain_strategy_uses_fixed_source_file() {
        let entrypoint = resolve(&profile("python"), "print('hi')").unwrap();
        assert_eq!(entrypoint.source_file, "Main.py");
        assert_eq!(entrypoint.name, "Main.py");
    }

    #[test]
    fn test_extracts_public_class() {
        let code = r#"
import java.util.*;

public class HelloWorld {
    public static void main(String[] args) {
        System.out.println("Hello");
    }
}
"#;
        let entrypoint = resolve(&profile("java"), code).unwrap();
        assert_eq!(entrypoint.name, "HelloWorld");
        assert_eq!(entrypoint.source_file, "HelloWorld.java");
    }

    #[test]
    fn test_modifiers_before_class_keyword() {
        assert_eq!(
            extract_public_class_name("public final class Solver {}"),
            Some("Solver".to_string())
        );
    }

    #[test]
    fn test_commented_declaration_is_ignored() {
        let code = "// public class Old {}\n/* public class Older {} */\npublic class Current {}";
        assert_eq!(extract_public_class_name(code), Some("Current".to_string()));
    }

    #[test]
    fn test_missing_public_class() {
        let err = resolve(&profile("java"), "class Main { }").unwrap_err();
        assert_eq!(
            err,
            EntrypointError::MissingEntrypoint {
                language: "java".to_string()
            }
        );
    }
}
