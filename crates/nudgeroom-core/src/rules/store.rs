//! Rule storage and persistence.
//!
//! Rules live in `rules.toml` next to the config file. A missing file is
//! created with [`Rule::defaults`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{Result, Rule, RuleError};
use crate::storage::data_dir;

/// Storage for user rules
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

/// Wrapper for serializing rules to TOML
#[derive(Serialize, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

impl RuleStore {
    /// Open the rule store, writing the defaults if needed.
    ///
    /// # Errors
    /// Returns an error if the data directory or the file cannot be created.
    pub fn open() -> Result<Self> {
        let dir = data_dir().map_err(|e| RuleError::DataDirError(e.to_string()))?;
        let store = Self::with_path(dir.join("rules.toml"));
        if !store.path.exists() {
            store.reset()?;
        }
        Ok(store)
    }

    /// A store over an explicit file; nothing is written until saved.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all rules; a missing file has none.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or holds an
    /// invalid rule.
    pub fn load_all(&self) -> Result<Vec<Rule>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: RulesFile = toml::from_str(&content)?;
        for rule in &file.rules {
            rule.validate()?;
        }
        Ok(file.rules)
    }

    /// Load only enabled rules
    ///
    /// # Errors
    /// See [`RuleStore::load_all`].
    pub fn load_enabled(&self) -> Result<Vec<Rule>> {
        Ok(self.load_all()?.into_iter().filter(|r| r.enabled).collect())
    }

    /// # Errors
    /// Returns an error for an invalid rule or a failed write.
    pub fn save_all(&self, rules: &[Rule]) -> Result<()> {
        for rule in rules {
            rule.validate()?;
        }
        let file = RulesFile {
            rules: rules.to_vec(),
        };
        let content = toml::to_string_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Overwrite the file with the default rules.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn reset(&self) -> Result<Vec<Rule>> {
        let rules = Rule::defaults();
        self.save_all(&rules)?;
        Ok(rules)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, Trigger};

    #[test]
    fn test_missing_file_has_no_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::with_path(dir.path().join("rules.toml"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::with_path(dir.path().join("rules.toml"));
        let rules = vec![Rule {
            name: "refund-on-delete".into(),
            description: "Deleting a task returns the stake".into(),
            enabled: false,
            triggers: vec![Trigger::TaskDeleted],
            actions: vec![Action::CancelBet],
        }];

        store.save_all(&rules).unwrap();
        assert_eq!(store.load_all().unwrap(), rules);
        assert!(store.load_enabled().unwrap().is_empty());
    }

    #[test]
    fn test_reset_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::with_path(dir.path().join("nested").join("rules.toml"));
        store.reset().unwrap();
        assert_eq!(store.load_all().unwrap(), Rule::defaults());
    }

    #[test]
    fn test_hand_written_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[rules]]
name = "early-nudge"

[[rules.triggers]]
type = "TaskCreated"

[[rules.actions]]
type = "ScheduleNudge"
lead_mins = 120
fallback_delay_mins = 15
"#,
        )
        .unwrap();

        let rules = RuleStore::with_path(&path).load_all().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].enabled);
        assert_eq!(
            rules[0].actions,
            [Action::ScheduleNudge {
                lead_mins: 120,
                fallback_delay_mins: 15
            }]
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, "[[rules]]\nname = 3\n").unwrap();
        assert!(matches!(
            RuleStore::with_path(&path).load_all(),
            Err(RuleError::ParseError(_))
        ));
    }
}
