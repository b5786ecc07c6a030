//! Agent strategy loading. Strategies are
//! YAML files describing a reusable analysis instruction set; a user
//! override directory takes precedence over the built-in defaults by name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyCategory {
    Trend,
    Pattern,
    Reversal,
    Framework,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Strategy {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: StrategyCategory,
    #[serde(default)]
    pub core_rules: Option<Vec<i32>>,
    #[serde(default)]
    pub required_tools: Option<Vec<String>>,
    pub instructions: String,
}

/// Load every `*.yaml`/`*.yml` file from `built_in_dir`, then overlay any
/// same-named strategy from `user_dir` — the user directory always wins over
/// the built-in one.
pub fn load_strategies(built_in_dir: &Path, user_dir: Option<&Path>) -> HashMap<String, Strategy> {
    let mut strategies = HashMap::new();
    load_dir_into(built_in_dir, &mut strategies);
    if let Some(dir) = user_dir {
        load_dir_into(dir, &mut strategies);
    }
    strategies
}

fn load_dir_into(dir: &Path, out: &mut HashMap<String, Strategy>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path.extension().is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }
        match std::fs::read_to_string(&path).and_then(|s| {
            serde_yaml::from_str::<Strategy>(&s).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }) {
            Ok(strategy) => {
                info!(file = %path.display(), name = %strategy.name, "loaded agent strategy");
                out.insert(strategy.name.clone(), strategy);
            }
            Err(e) => warn!(file = %path.display(), error = %e, "failed to load strategy file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_strategy(dir: &Path, filename: &str, name: &str, instructions: &str) {
        let mut file = std::fs::File::create(dir.join(filename)).unwrap();
        writeln!(
            file,
            "name: {name}\ndisplay_name: \"{name}\"\ndescription: \"test strategy\"\ncategory: trend\ninstructions: \"{instructions}\""
        )
        .unwrap();
    }

    #[test]
    fn user_dir_overrides_built_in_by_name() {
        let built_in = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        write_strategy(built_in.path(), "default.yaml", "default", "built-in instructions");
        write_strategy(user.path(), "default.yaml", "default", "user instructions");

        let strategies = load_strategies(built_in.path(), Some(user.path()));
        assert_eq!(strategies["default"].instructions, "user instructions");
    }

    #[test]
    fn non_yaml_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "not a strategy").unwrap();
        let strategies = load_strategies(dir.path(), None);
        assert!(strategies.is_empty());
    }

    #[test]
    fn optional_fields_default_to_none() {
        let dir = tempfile::tempdir().unwrap();
        write_strategy(dir.path(), "macd_cross.yaml", "macd_cross", "Trade MACD crossovers.");
        let strategies = load_strategies(dir.path(), None);
        let strategy = &strategies["macd_cross"];
        assert_eq!(strategy.category, StrategyCategory::Trend);
        assert!(strategy.core_rules.is_none());
        assert!(strategy.required_tools.is_none());
    }
}
