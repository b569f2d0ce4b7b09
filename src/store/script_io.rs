use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::store::{RulePersistence, ScriptKind};

const SCRIPT_EXTENSION: &str = "sieve";
const OUTGOING_DIR: &str = "outgoing";

/// One `<account>.sieve` file per account inside a directory. Outgoing rules live
/// in its `outgoing` subdirectory under the same file name.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    dir: PathBuf,
}

impl FileRuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn script_path(&self, account: &str, kind: ScriptKind) -> Result<PathBuf> {
        let unsafe_name = account.is_empty()
            || account.starts_with('.')
            || account.contains(['/', '\\', '\0']);
        if unsafe_name {
            return Err(Error::InvalidRequest(format!(
                "account name {account:?} cannot be used as a file name"
            )));
        }
        let file = format!("{account}.{SCRIPT_EXTENSION}");
        Ok(match kind {
            ScriptKind::Incoming => self.dir.join(file),
            ScriptKind::Outgoing => self.dir.join(OUTGOING_DIR).join(file),
        })
    }
}

pub fn load_script(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes through a sibling temp file so readers never see half a script.
pub fn save_script(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("sieve.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl RulePersistence for FileRuleStore {
    fn load(&self, account: &str, kind: ScriptKind) -> Result<Option<String>> {
        let path = self.script_path(account, kind)?;
        tracing::debug!(path = %path.display(), %kind, "loading rules");
        load_script(&path)
    }

    fn save(&self, account: &str, kind: ScriptKind, text: &str) -> Result<()> {
        let path = self.script_path(account, kind)?;
        tracing::debug!(path = %path.display(), %kind, "saving rules");
        save_script(&path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuleStore::new(dir.path().join("rules"));
        let account = "alice@example.com";
        assert_eq!(store.load(account, ScriptKind::Incoming).unwrap(), None);

        store.save(account, ScriptKind::Incoming, "keep;\n").unwrap();
        assert_eq!(
            store.load(account, ScriptKind::Incoming).unwrap().as_deref(),
            Some("keep;\n")
        );
        assert!(dir.path().join("rules/alice@example.com.sieve").is_file());
        assert!(!dir.path().join("rules/alice@example.com.sieve.tmp").exists());
        assert_eq!(store.load(account, ScriptKind::Outgoing).unwrap(), None);
    }

    #[test]
    fn test_outgoing_rules_in_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuleStore::new(dir.path());
        store.save("bob", ScriptKind::Outgoing, "stop;\n").unwrap();
        assert!(dir.path().join("outgoing/bob.sieve").is_file());
        assert!(!dir.path().join("bob.sieve").exists());
        assert_eq!(
            store.load("bob", ScriptKind::Outgoing).unwrap().as_deref(),
            Some("stop;\n")
        );
    }

    #[test]
    fn test_rejects_path_like_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuleStore::new(dir.path());
        for account in ["", "../x", "a/b", ".hidden"] {
            assert!(matches!(
                store.save(account, ScriptKind::Outgoing, "keep;"),
                Err(Error::InvalidRequest(_))
            ));
        }
    }
}
