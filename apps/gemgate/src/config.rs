use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use gemgate_pool::KeyInput;

use crate::cli::Cli;

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyFileEntry {
    Plain(String),
    Input(KeyInput),
}

/// Keys from `--keys-file` first, then `--key`/`GEMGATE_KEYS`. Duplicates are
/// dropped, keeping the first occurrence.
pub(crate) fn load_keys(cli: &Cli) -> Result<Vec<KeyInput>> {
    let mut inputs = match &cli.keys_file {
        Some(path) => read_keys_file(path)?,
        None => Vec::new(),
    };
    inputs.extend(
        cli.keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .map(|key| KeyInput {
                source: "env".to_string(),
                ..KeyInput::manual(key)
            }),
    );

    let mut seen = std::collections::HashSet::new();
    inputs.retain(|input| seen.insert(input.key.trim().to_string()));
    Ok(inputs)
}

fn read_keys_file(path: &Path) -> Result<Vec<KeyInput>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading keys file {}", path.display()))?;
    parse_keys(&raw).with_context(|| format!("parsing keys file {}", path.display()))
}

fn parse_keys(raw: &str) -> Result<Vec<KeyInput>> {
    let entries: Vec<KeyFileEntry> =
        serde_json::from_str(raw).context("expected a JSON array of keys")?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            KeyFileEntry::Plain(key) => KeyInput {
                source: "file".to_string(),
                ..KeyInput::manual(key)
            },
            KeyFileEntry::Input(input) => input,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn keys_file_accepts_strings_and_objects() {
        let keys = parse_keys(
            r#"["AIzaSy-plain-00000", {"apiKey": "AIzaSy-object-1111", "configName": "work", "enabled": false}]"#,
        )
        .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].source, "file");
        assert_eq!(keys[1].key, "AIzaSy-object-1111");
        assert_eq!(keys[1].label.as_deref(), Some("work"));
        assert!(!keys[1].enabled);

        assert!(parse_keys(r#"{"keys": []}"#).is_err());
    }

    #[test]
    fn cli_keys_are_split_and_deduplicated() {
        let cli = Cli::parse_from([
            "gemgate",
            "--key",
            "AIzaSy-one-0000000, AIzaSy-two-1111111",
            "--key",
            "AIzaSy-one-0000000",
            "--key",
            " ",
        ]);
        let keys = load_keys(&cli).unwrap();
        let names: Vec<&str> = keys.iter().map(|input| input.key.as_str()).collect();
        assert_eq!(names, vec!["AIzaSy-one-0000000", "AIzaSy-two-1111111"]);
        assert!(keys.iter().all(|input| input.source == "env"));
    }

    #[test]
    fn missing_keys_file_names_the_path() {
        let cli = Cli::parse_from(["gemgate", "--keys-file", "/nonexistent/gemgate-keys.json"]);
        let err = load_keys(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/gemgate-keys.json"));
    }
}
