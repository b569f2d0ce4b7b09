//! Compiled rule scripts per account, kept in step with what is persisted.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lru_cache::LruCache;
use parking_lot::Mutex;

use crate::error::Result;
use crate::sieve::ast::Script;
use crate::sieve::{emitter, parser};
use crate::store::{RulePersistence, ScriptKind};

const LOCK_STRIPES: usize = 64;

type ScriptKey = (String, ScriptKind);

/// Bounded LRU of `Arc<Script>` keyed by account and script kind.
///
/// Every operation that reads or writes a script holds that script's stripe lock
/// for its whole sequence, so a save can never be overtaken by a compile of the
/// text it replaces.
pub struct CompiledScriptCache {
    scripts: Mutex<LruCache<ScriptKey, Arc<Script>>>,
    locks: Vec<Mutex<()>>,
    store: Arc<dyn RulePersistence>,
}

impl CompiledScriptCache {
    pub fn new(capacity: usize, store: Arc<dyn RulePersistence>) -> Self {
        Self {
            scripts: Mutex::new(LruCache::new(capacity.max(1))),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            store,
        }
    }

    pub fn store(&self) -> &dyn RulePersistence {
        self.store.as_ref()
    }

    fn lock_for(&self, account: &str, kind: ScriptKind) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        account.hash(&mut hasher);
        kind.hash(&mut hasher);
        &self.locks[hasher.finish() as usize % self.locks.len()]
    }

    fn cached(&self, key: &ScriptKey) -> Option<Arc<Script>> {
        self.scripts.lock().get_mut(key).cloned()
    }

    fn insert(&self, key: ScriptKey, script: Script) -> Arc<Script> {
        let script = Arc::new(script);
        self.scripts.lock().insert(key, script.clone());
        script
    }

    /// Must be called with the script's lock held.
    fn load_locked(&self, account: &str, kind: ScriptKind) -> Result<Arc<Script>> {
        let key = (account.to_string(), kind);
        if let Some(script) = self.cached(&key) {
            return Ok(script);
        }
        let script = match self.store.load(account, kind)? {
            Some(text) => parser::parse(&text)?,
            None => Script::default(),
        };
        tracing::debug!(account, %kind, rules = script.rules().count(), "compiled rules");
        Ok(self.insert(key, script))
    }

    /// The compiled script of `account`, compiling the persisted text on a miss.
    /// An account without rules gets an empty script.
    pub fn get_or_compile(&self, account: &str, kind: ScriptKind) -> Result<Arc<Script>> {
        let _guard = self.lock_for(account, kind).lock();
        self.load_locked(account, kind)
    }

    /// Compiles `text`, persists it and replaces the cached script. Nothing is
    /// persisted when the text does not compile.
    pub fn save(&self, account: &str, kind: ScriptKind, text: &str) -> Result<Arc<Script>> {
        let script = parser::parse(text)?;
        let _guard = self.lock_for(account, kind).lock();
        self.store.save(account, kind, text)?;
        Ok(self.insert((account.to_string(), kind), script))
    }

    /// Read-modify-write of a script under its lock. `f` returns the replacement
    /// script, or `None` to leave everything as it is. Returns whether anything
    /// was saved.
    pub fn update<F>(&self, account: &str, kind: ScriptKind, f: F) -> Result<bool>
    where
        F: FnOnce(&Script) -> Option<Script>,
    {
        let _guard = self.lock_for(account, kind).lock();
        let current = self.load_locked(account, kind)?;
        let Some(updated) = f(&current) else {
            return Ok(false);
        };
        let text = emitter::emit(&updated);
        self.store.save(account, kind, &text)?;
        self.insert((account.to_string(), kind), updated);
        Ok(true)
    }

    /// Drops both compiled scripts of the account.
    pub fn invalidate(&self, account: &str) {
        for kind in ScriptKind::ALL {
            let _guard = self.lock_for(account, kind).lock();
            self.scripts.lock().remove(&(account.to_string(), kind));
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
