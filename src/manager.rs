//! Per-account entry points: rule storage, incoming and outgoing filtering, and
//! folder/tag maintenance.

use std::sync::Arc;

use crate::cache::CompiledScriptCache;
use crate::engine::handler::{DeliveryHandler, MessageRef};
use crate::error::{Error, Result};
use crate::message::{MessageOptions, ParsedMessage};
use crate::model::rule::FilterRule;
use crate::model::script::FilterRules;
use crate::sieve::ast::{Command, Script};
use crate::sieve::{converter, rewrite};
use crate::store::ScriptKind;

pub struct RuleManager {
    cache: Arc<CompiledScriptCache>,
    options: MessageOptions,
}

impl RuleManager {
    pub fn new(cache: Arc<CompiledScriptCache>) -> Self {
        Self::with_options(cache, MessageOptions::default())
    }

    pub fn with_options(cache: Arc<CompiledScriptCache>, options: MessageOptions) -> Self {
        Self { cache, options }
    }

    pub fn cache(&self) -> &CompiledScriptCache {
        &self.cache
    }

    /// Parses a raw message with this manager's message options.
    pub fn parse_message(&self, raw: &[u8]) -> ParsedMessage {
        ParsedMessage::with_options(raw, self.options.clone())
    }

    /// Replaces one of the account's scripts. A script that does not compile is
    /// rejected and nothing changes.
    pub fn set_rules(&self, account: &str, kind: ScriptKind, text: &str) -> Result<()> {
        let script = self.cache.save(account, kind, text)?;
        tracing::info!(account, %kind, rules = script.rules().count(), "rules saved");
        Ok(())
    }

    pub fn get_rules(&self, account: &str, kind: ScriptKind) -> Result<Option<String>> {
        self.cache.store().load(account, kind)
    }

    pub fn rule_names(&self, account: &str, kind: ScriptKind) -> Result<Vec<String>> {
        let script = self.cache.get_or_compile(account, kind)?;
        Ok(script
            .rules()
            .filter_map(|(_, rule)| rule.name.clone())
            .collect())
    }

    /// The first rule called `name` in structured form. `None` when no rule has that
    /// name or the named rule cannot be represented structurally.
    pub fn rule_by_name(
        &self,
        account: &str,
        kind: ScriptKind,
        name: &str,
    ) -> Result<Option<FilterRule>> {
        let rules = self.get_rules_structured(account, kind)?;
        Ok(rules.rules.into_iter().find(|rule| rule.name == name))
    }

    pub fn get_rules_structured(&self, account: &str, kind: ScriptKind) -> Result<FilterRules> {
        let script = self.cache.get_or_compile(account, kind)?;
        Ok(converter::script_to_rules(&script))
    }

    pub fn set_rules_structured(
        &self,
        account: &str,
        kind: ScriptKind,
        rules: &FilterRules,
    ) -> Result<()> {
        let text = converter::rules_to_script(rules)?;
        self.set_rules(account, kind, &text)
    }

    /// Runs the account's incoming rules on a message being delivered. If anything
    /// goes wrong while compiling, evaluating or dispatching, the message is kept
    /// in the default folder instead.
    pub fn apply_rules_to_incoming<H: DeliveryHandler + ?Sized>(
        &self,
        account: &str,
        message: &ParsedMessage,
        handler: &mut H,
    ) -> Result<Vec<MessageRef>> {
        self.apply(account, ScriptKind::Incoming, message, handler)
    }

    /// Runs the account's outgoing rules on a message being sent. The handler's
    /// default folder is where sent mail is kept; a failure files the message
    /// there through an implicit keep.
    pub fn apply_rules_to_outgoing<H: DeliveryHandler + ?Sized>(
        &self,
        account: &str,
        message: &ParsedMessage,
        handler: &mut H,
    ) -> Result<Vec<MessageRef>> {
        self.apply(account, ScriptKind::Outgoing, message, handler)
    }

    /// Runs only the named incoming rules on a message already in the mailbox.
    /// Unlike delivery, errors are returned instead of falling back to a keep.
    pub fn apply_rules_to_existing<H: DeliveryHandler + ?Sized>(
        &self,
        account: &str,
        rule_names: &[&str],
        message: &ParsedMessage,
        handler: &mut H,
    ) -> Result<Vec<MessageRef>> {
        let script = self.cache.get_or_compile(account, ScriptKind::Incoming)?;
        let selected = Script {
            commands: script
                .commands
                .iter()
                .filter(|command| match command {
                    Command::Require(_) => true,
                    Command::If(rule) => rule
                        .name
                        .as_deref()
                        .is_some_and(|name| rule_names.contains(&name)),
                    _ => false,
                })
                .cloned()
                .collect(),
        };
        if selected.rules().next().is_none() {
            return Err(Error::InvalidRequest(format!(
                "no rule named {}",
                rule_names.join(", ")
            )));
        }
        crate::engine::apply(&selected, message, handler, account)
    }

    fn apply<H: DeliveryHandler + ?Sized>(
        &self,
        account: &str,
        kind: ScriptKind,
        message: &ParsedMessage,
        handler: &mut H,
    ) -> Result<Vec<MessageRef>> {
        let result = self
            .cache
            .get_or_compile(account, kind)
            .and_then(|script| crate::engine::apply(&script, message, handler, account));
        match result {
            Ok(added) => Ok(added),
            Err(e) => {
                tracing::warn!(
                    account,
                    %kind,
                    message_id = message.message_id().unwrap_or(""),
                    "filtering failed, filing into {}: {e}",
                    handler.default_folder()
                );
                let stored = match kind {
                    ScriptKind::Incoming => handler.explicit_keep(&[], &[])?,
                    ScriptKind::Outgoing => handler.implicit_keep(&[], &[])?,
                };
                Ok(stored.into_iter().collect())
            }
        }
    }

    pub fn folder_renamed(&self, account: &str, old: &str, new: &str) -> Result<bool> {
        self.rewrite(account, "folder renamed", |s| {
            rewrite::folder_renamed(s, old, new)
        })
    }

    pub fn folder_deleted(&self, account: &str, path: &str) -> Result<bool> {
        self.rewrite(account, "folder deleted", |s| rewrite::folder_deleted(s, path))
    }

    pub fn tag_renamed(&self, account: &str, old: &str, new: &str) -> Result<bool> {
        self.rewrite(account, "tag renamed", |s| rewrite::tag_renamed(s, old, new))
    }

    pub fn tag_deleted(&self, account: &str, name: &str) -> Result<bool> {
        self.rewrite(account, "tag deleted", |s| rewrite::tag_deleted(s, name))
    }

    /// Applies a maintenance rewrite to both scripts of the account. Stored rules
    /// that no longer compile are left untouched.
    fn rewrite<F>(&self, account: &str, event: &str, f: F) -> Result<bool>
    where
        F: Fn(&Script) -> Option<Script>,
    {
        let mut changed = false;
        for kind in ScriptKind::ALL {
            match self.cache.update(account, kind, &f) {
                Ok(true) => {
                    tracing::info!(account, %kind, event, "rules updated");
                    changed = true;
                }
                Ok(false) => {}
                Err(Error::Compile(e)) => {
                    tracing::warn!(
                        account,
                        %kind,
                        event,
                        "stored rules do not compile, not updating: {e}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handler::{HandlerEvent, RecordingHandler};
    use crate::model::rule::FilterActionKind;
    use crate::store::{MemoryRuleStore, RulePersistence};

    const IN: ScriptKind = ScriptKind::Incoming;
    const OUT: ScriptKind = ScriptKind::Outgoing;

    const RULES: &str = r#"require ["fileinto", "tag"];
# bills
if header :contains "subject" "invoice" {
    fileinto "Finance/Bills";
}
# marketing
if header :contains "from" "news@" {
    tag "promo";
}
"#;

    const SENT_RULES: &str = r#"require "fileinto";
# sent invoices
if header :contains "subject" "invoice" {
    fileinto "Finance/Sent";
}
"#;

    const MESSAGE: &[u8] = b"From: shop@example.com\r\nSubject: Invoice 7\r\n\r\nPay up\r\n";

    fn manager() -> (Arc<MemoryRuleStore>, RuleManager) {
        let store = Arc::new(MemoryRuleStore::new());
        let cache = Arc::new(CompiledScriptCache::new(16, store.clone()));
        (store, RuleManager::new(cache))
    }

    #[test]
    fn test_set_and_get_rules() {
        let (_, manager) = manager();
        assert_eq!(manager.get_rules("a", IN).unwrap(), None);
        manager.set_rules("a", IN, RULES).unwrap();
        assert_eq!(manager.get_rules("a", IN).unwrap().as_deref(), Some(RULES));
        assert_eq!(manager.rule_names("a", IN).unwrap(), vec!["bills", "marketing"]);
    }

    #[test]
    fn test_set_rules_rejects_bad_script() {
        let (_, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        let err = manager.set_rules("a", IN, "if header {").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
        assert_eq!(manager.get_rules("a", IN).unwrap().as_deref(), Some(RULES));
    }

    #[test]
    fn test_apply_rules_to_incoming() {
        let (_, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        let mut handler = RecordingHandler::default();
        let message = manager.parse_message(MESSAGE);
        let added = manager
            .apply_rules_to_incoming("a", &message, &mut handler)
            .unwrap();
        assert_eq!(added.len(), 1);
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::FiledInto { folder, .. }] if folder == "Finance/Bills"
        ));
    }

    #[test]
    fn test_failed_evaluation_keeps_message() {
        let (store, manager) = manager();
        // bypasses compilation, so the bad regex only shows up at evaluation time
        store
            .save("a", IN, "require \"regex\"; if header :regex \"subject\" \"(\" { discard; }")
            .unwrap();
        let mut handler = RecordingHandler::default();
        let message = manager.parse_message(MESSAGE);
        let added = manager
            .apply_rules_to_incoming("a", &message, &mut handler)
            .unwrap();
        assert_eq!(added.len(), 1);
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::ExplicitKeep { flags, tags, .. }] if flags.is_empty() && tags.is_empty()
        ));
    }

    #[test]
    fn test_uncompilable_stored_rules_keep_message() {
        let (store, manager) = manager();
        store.save("a", IN, "if {").unwrap();
        let mut handler = RecordingHandler::default();
        let message = manager.parse_message(MESSAGE);
        manager
            .apply_rules_to_incoming("a", &message, &mut handler)
            .unwrap();
        assert_eq!(handler.copies(), 1);
        assert!(!manager.folder_deleted("a", "Finance").unwrap());
        assert_eq!(store.load("a", IN).unwrap().as_deref(), Some("if {"));
    }

    #[test]
    fn test_folder_and_tag_events() {
        let (store, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();

        assert!(manager.folder_renamed("a", "Finance", "Money").unwrap());
        assert!(store.load("a", IN).unwrap().unwrap().contains("\"Money/Bills\""));
        assert!(!manager.folder_renamed("a", "Finance", "Money").unwrap());

        assert!(manager.tag_renamed("a", "promo", "ads").unwrap());
        assert!(manager.tag_deleted("a", "ads").unwrap());
        assert!(!manager.tag_deleted("a", "ads").unwrap());
        assert!(store.load("a", IN).unwrap().unwrap().contains("disabled_if"));

        assert!(manager.folder_deleted("a", "Money").unwrap());
        let structured = manager.get_rules_structured("a", IN).unwrap();
        assert_eq!(structured.names(), vec!["bills", "marketing"]);
        assert!(structured.rules.iter().all(|r| !r.active));
    }

    #[test]
    fn test_structured_round_trip() {
        let (_, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        let structured = manager.get_rules_structured("a", IN).unwrap();
        manager.set_rules_structured("b", IN, &structured).unwrap();
        assert_eq!(
            manager.get_rules_structured("b", IN).unwrap(),
            structured
        );
    }

    #[test]
    fn test_outgoing_rules_are_separate() {
        let (store, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        assert_eq!(manager.get_rules("a", OUT).unwrap(), None);

        manager.set_rules("a", OUT, SENT_RULES).unwrap();
        assert_eq!(manager.get_rules("a", OUT).unwrap().as_deref(), Some(SENT_RULES));
        assert_eq!(store.load("a", IN).unwrap().as_deref(), Some(RULES));
        assert_eq!(manager.rule_names("a", OUT).unwrap(), vec!["sent invoices"]);
        assert_eq!(manager.rule_names("a", IN).unwrap(), vec!["bills", "marketing"]);

        let structured = manager.get_rules_structured("a", OUT).unwrap();
        manager.set_rules_structured("b", OUT, &structured).unwrap();
        assert_eq!(manager.get_rules_structured("b", OUT).unwrap(), structured);
        assert_eq!(manager.get_rules("b", IN).unwrap(), None);
    }

    #[test]
    fn test_apply_rules_to_outgoing() {
        let (_, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        manager
            .set_rules("a", OUT, "require \"tag\";\nif true {\n    tag \"sent\";\n}\n")
            .unwrap();
        let mut handler = RecordingHandler::new("Sent");
        let message = manager.parse_message(MESSAGE);
        let added = manager
            .apply_rules_to_outgoing("a", &message, &mut handler)
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(
            handler.events,
            vec![HandlerEvent::ImplicitKeep {
                folder: "Sent".into(),
                flags: Vec::new(),
                tags: vec!["sent".into()],
            }]
        );
    }

    #[test]
    fn test_failed_outgoing_filtering_keeps_in_sent() {
        let (store, manager) = manager();
        store.save("a", OUT, "if {").unwrap();
        let mut handler = RecordingHandler::new("Sent");
        let message = manager.parse_message(MESSAGE);
        let added = manager
            .apply_rules_to_outgoing("a", &message, &mut handler)
            .unwrap();
        assert_eq!(added.len(), 1);
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::ImplicitKeep { folder, .. }] if folder == "Sent"
        ));
    }

    #[test]
    fn test_rule_by_name() {
        let (_, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        let rule = manager.rule_by_name("a", IN, "marketing").unwrap().unwrap();
        assert_eq!(rule.name, "marketing");
        assert!(rule.active);
        assert!(matches!(
            rule.actions.as_slice(),
            [action] if matches!(&action.kind, FilterActionKind::Tag { tag } if tag == "promo")
        ));
        assert_eq!(manager.rule_by_name("a", IN, "missing").unwrap(), None);
        assert_eq!(manager.rule_by_name("a", OUT, "marketing").unwrap(), None);
    }

    #[test]
    fn test_apply_named_rules_to_existing() {
        let (_, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        let message = manager.parse_message(MESSAGE);

        let mut handler = RecordingHandler::default();
        manager
            .apply_rules_to_existing("a", &["bills"], &message, &mut handler)
            .unwrap();
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::FiledInto { folder, .. }] if folder == "Finance/Bills"
        ));

        let mut handler = RecordingHandler::default();
        manager
            .apply_rules_to_existing("a", &["marketing"], &message, &mut handler)
            .unwrap();
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::ImplicitKeep { folder, .. }] if folder == "Inbox"
        ));

        let mut handler = RecordingHandler::default();
        let err = manager
            .apply_rules_to_existing("a", &["missing"], &message, &mut handler)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(handler.events.is_empty());
    }

    #[test]
    fn test_events_rewrite_both_kinds() {
        let (store, manager) = manager();
        manager.set_rules("a", IN, RULES).unwrap();
        manager.set_rules("a", OUT, SENT_RULES).unwrap();
        assert!(manager.folder_renamed("a", "Finance", "Money").unwrap());
        assert!(store.load("a", IN).unwrap().unwrap().contains("\"Money/Bills\""));
        assert!(store.load("a", OUT).unwrap().unwrap().contains("\"Money/Sent\""));
    }
}
