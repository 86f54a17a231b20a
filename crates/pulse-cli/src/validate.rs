//! # Validate Subcommand
//!
//! Checks the engine configuration and every auto-reason instance of a
//! document and reports all issues at once. A scenario document is
//! accepted too; only its `engine` and `extensions` sections are checked.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use pulse_core::CoreError;

use crate::scenario::ConfigDocument;

/// Arguments for the `pulse validate` subcommand.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration or scenario document.
    pub config: PathBuf,
}

/// Execute the validate subcommand. Returns exit code 1 when issues were
/// found.
pub fn run_validate(args: &ValidateArgs) -> Result<u8> {
    let issues = validate_path(&args.config)?;
    if issues.is_empty() {
        println!("OK: {}", args.config.display());
        return Ok(0);
    }
    for issue in &issues {
        println!("ERROR: {issue}");
    }
    println!("{} issue(s) in {}", issues.len(), args.config.display());
    Ok(1)
}

pub fn validate_path(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let document: ConfigDocument = serde_yaml::from_str(&content)
        .with_context(|| format!("malformed configuration {}", path.display()))?;
    Ok(validate_document(&document))
}

/// Every issue of `document`, engine first.
pub fn validate_document(document: &ConfigDocument) -> Vec<String> {
    let mut issues = Vec::new();
    match document.engine.validate() {
        Ok(()) => {}
        Err(CoreError::InvalidConfig { issues: engine }) => {
            issues.extend(engine.into_iter().map(|i| format!("engine: {i}")));
        }
        Err(e) => issues.push(format!("engine: {e}")),
    }
    for (plugin, error) in document.extensions.validate_all() {
        issues.push(format!("extensions.{plugin}: {error}"));
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(doc: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_document_is_valid() {
        let file = write("{}\n");
        assert!(validate_path(file.path()).unwrap().is_empty());
    }

    #[test]
    fn test_all_issues_are_reported() {
        let file = write(
            r#"
engine:
  checkpoint_epsilon_ms: 0
  max_parallel_machines: 0
extensions:
  CycleEnd:
    - instance: main
      default_reason_key: CycleEnd
    - instance: broken
"#,
        );
        let issues = validate_path(file.path()).unwrap();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].starts_with("engine: checkpoint_epsilon_ms"));
        assert!(issues[2].starts_with("extensions.CycleEnd:"));
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let file = write("engine: not-a-map\n");
        assert!(validate_path(file.path()).is_err());
    }
}
