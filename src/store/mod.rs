//! Where each account's rule script text lives.

pub mod script_io;

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::Result;

pub use script_io::FileRuleStore;

/// Which of an account's two rule scripts: mail being delivered or mail being sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    #[default]
    Incoming,
    Outgoing,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 2] = [ScriptKind::Incoming, ScriptKind::Outgoing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loads and saves the rule scripts of an account.
///
/// Calls are synchronous and each one is treated as atomic.
pub trait RulePersistence: Send + Sync {
    /// `None` when the account has no rules of that kind yet.
    fn load(&self, account: &str, kind: ScriptKind) -> Result<Option<String>>;

    fn save(&self, account: &str, kind: ScriptKind, text: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    scripts: Mutex<HashMap<(String, ScriptKind), String>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RulePersistence for MemoryRuleStore {
    fn load(&self, account: &str, kind: ScriptKind) -> Result<Option<String>> {
        Ok(self
            .scripts
            .lock()
            .get(&(account.to_string(), kind))
            .cloned())
    }

    fn save(&self, account: &str, kind: ScriptKind, text: &str) -> Result<()> {
        self.scripts
            .lock()
            .insert((account.to_string(), kind), text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryRuleStore::new();
        assert_eq!(store.load("a", ScriptKind::Incoming).unwrap(), None);
        store.save("a", ScriptKind::Incoming, "keep;").unwrap();
        store.save("a", ScriptKind::Incoming, "discard;").unwrap();
        assert_eq!(
            store.load("a", ScriptKind::Incoming).unwrap().as_deref(),
            Some("discard;")
        );
        assert_eq!(store.load("b", ScriptKind::Incoming).unwrap(), None);
    }

    #[test]
    fn test_kinds_are_stored_apart() {
        let store = MemoryRuleStore::new();
        store.save("a", ScriptKind::Outgoing, "stop;").unwrap();
        assert_eq!(store.load("a", ScriptKind::Incoming).unwrap(), None);
        assert_eq!(
            store.load("a", ScriptKind::Outgoing).unwrap().as_deref(),
            Some("stop;")
        );
        assert_eq!(ScriptKind::default(), ScriptKind::Incoming);
        assert_eq!(ScriptKind::Outgoing.to_string(), "outgoing");
    }
}
