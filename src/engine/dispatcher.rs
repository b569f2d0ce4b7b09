//! Turns an `Evaluation` into calls on a `DeliveryHandler`.

use std::collections::HashMap;

use crate::engine::evaluator::Evaluation;
use crate::engine::handler::{DeliveryHandler, MessageRef, Notification};
use crate::engine::template::{message_variables, render};
use crate::error::{Error, Result};
use crate::message::{is_auto_submitted, ParsedMessage};
use crate::sieve::ast::Action;

const FORWARDED_HEADER: &str = "X-Zimbra-Forwarded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    NoActions,
    Collected,
    Dispatched,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepKind {
    Implicit,
    Explicit,
}

/// One unit of work, after duplicate fileintos have been merged.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Keep(KeepKind),
    /// A `keep` written in the script
    ScriptKeep,
    FileInto { path: String, flags: Vec<String> },
    Redirect { address: String },
    Reply { body: String },
    Notify(Box<Action>),
}

/// Strips leading `/` and trailing `/` or spaces, the form filed paths are compared in.
pub fn normalize_path(path: &str) -> String {
    path.trim_start_matches('/')
        .trim_end_matches(|c| c == '/' || c == ' ')
        .to_string()
}

fn same_path(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Per-message delivery state: collected actions, filed paths and added copies.
pub struct ActionDispatcher<'a, H: DeliveryHandler + ?Sized> {
    handler: &'a mut H,
    message: &'a ParsedMessage,
    account: String,
    state: DispatchState,
    steps: Vec<Step>,
    discard: bool,
    /// Non-discard actions seen
    collected: usize,
    /// `:copy` of the last fileinto or redirect
    last_copy: Option<bool>,
    flags: Vec<String>,
    tags: Vec<String>,
    filed_paths: Vec<String>,
    added: Vec<MessageRef>,
    variables: Option<HashMap<String, String>>,
}

impl<'a, H: DeliveryHandler + ?Sized> ActionDispatcher<'a, H> {
    pub fn new(handler: &'a mut H, message: &'a ParsedMessage, account: impl Into<String>) -> Self {
        Self {
            handler,
            message,
            account: account.into(),
            state: DispatchState::NoActions,
            steps: Vec::new(),
            discard: false,
            collected: 0,
            last_copy: None,
            flags: Vec::new(),
            tags: Vec::new(),
            filed_paths: Vec::new(),
            added: Vec::new(),
            variables: None,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Copies delivered so far.
    pub fn added(&self) -> &[MessageRef] {
        &self.added
    }

    /// Takes the evaluation's actions. Flags and tags are pooled for every copy,
    /// duplicate fileintos are merged and the implicit keep goes last.
    pub fn collect(&mut self, evaluation: Evaluation) {
        for action in evaluation.actions {
            if !matches!(action, Action::Discard | Action::Stop) {
                self.collected += 1;
            }
            match action {
                Action::Discard => self.discard = true,
                Action::Flag { name, set: true } => {
                    if !self.flags.contains(&name) {
                        self.flags.push(name);
                    }
                }
                Action::Flag { name, set: false } => self.flags.retain(|f| *f != name),
                Action::Tag { name } => {
                    if !self.tags.contains(&name) {
                        self.tags.push(name);
                    }
                }
                Action::Keep => self.steps.push(Step::ScriptKeep),
                Action::FileInto { path, copy, flags } => {
                    self.last_copy = Some(copy);
                    self.push_fileinto(path, flags);
                }
                Action::Redirect { address, copy } => {
                    self.last_copy = Some(copy);
                    self.steps.push(Step::Redirect { address });
                }
                Action::Reply { body } => self.steps.push(Step::Reply { body }),
                action @ Action::Notify { .. } => self.steps.push(Step::Notify(Box::new(action))),
                Action::Stop => {}
            }
        }
        if evaluation.implicit_keep {
            self.steps.push(Step::Keep(KeepKind::Implicit));
        }
        self.state = DispatchState::Collected;
    }

    fn push_fileinto(&mut self, path: String, flags: Vec<String>) {
        let normalized = normalize_path(&path);
        let existing = self.steps.iter_mut().find_map(|step| match step {
            Step::FileInto { path, flags } if same_path(&normalize_path(path), &normalized) => {
                Some(flags)
            }
            _ => None,
        });
        match existing {
            Some(existing) => {
                tracing::debug!(path = %path, "merging duplicate fileinto");
                for flag in flags {
                    if !existing.contains(&flag) {
                        existing.push(flag);
                    }
                }
            }
            None => self.steps.push(Step::FileInto { path, flags }),
        }
    }

    fn has_reply_or_notify(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, Step::Reply { .. } | Step::Notify(_)))
    }

    /// Whether an explicit keep must be added before running the steps.
    fn needs_explicit_keep(&self) -> bool {
        let has_delivery = self.steps.iter().any(|s| {
            matches!(
                s,
                Step::Keep(_) | Step::ScriptKeep | Step::FileInto { .. } | Step::Redirect { .. }
            )
        });
        if !has_delivery {
            // flag and tag actions alone still keep the message, even next to a discard
            return !self.has_reply_or_notify() || !self.discard;
        }
        self.last_copy == Some(true) && !self.discard
    }

    /// Runs the collected steps.
    pub fn dispatch(&mut self) -> Result<Vec<MessageRef>> {
        if self.state != DispatchState::Collected {
            return Err(Error::Evaluation(format!(
                "cannot dispatch in state {:?}",
                self.state
            )));
        }
        self.handler.before_filtering()?;
        let message_id = self.message.message_id().unwrap_or("");
        if self.discard {
            tracing::info!(message_id, "discarding message");
        }

        if self.steps.is_empty() && self.collected == 0 {
            self.handler.discard()?;
            self.state = DispatchState::Done;
            self.handler.after_filtering()?;
            return Ok(Vec::new());
        }

        if self.needs_explicit_keep() {
            self.keep(KeepKind::Explicit)?;
        }
        let steps = std::mem::take(&mut self.steps);
        for step in steps {
            self.execute(step)?;
        }
        self.state = DispatchState::Dispatched;

        self.handler.after_filtering()?;
        self.state = DispatchState::Done;
        Ok(self.added.clone())
    }

    fn execute(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Keep(kind) => self.keep(kind),
            Step::ScriptKeep if self.discard => {
                tracing::debug!("keep skipped, message discarded");
                Ok(())
            }
            Step::ScriptKeep => self.keep(KeepKind::Explicit),
            Step::FileInto { path, flags } => self.file_into(&path, flags),
            Step::Redirect { address } => {
                let result = self.check_loop(false).and_then(|()| {
                    tracing::info!(address = %address, "redirecting message");
                    self.handler.redirect(&address)
                });
                self.degrade(result, "redirect")
            }
            Step::Reply { body } => {
                let result = self.check_loop(true).and_then(|()| {
                    let body = render(&body, self.variables());
                    self.handler.reply(&body)
                });
                self.degrade(result, "reply")
            }
            Step::Notify(action) => {
                let result = self.check_loop(true).and_then(|()| self.notify(&action));
                self.degrade(result, "notify")
            }
        }
    }

    fn variables(&mut self) -> &HashMap<String, String> {
        let message = self.message;
        self.variables
            .get_or_insert_with(|| message_variables(message))
    }

    fn notify(&mut self, action: &Action) -> Result<()> {
        let Action::Notify {
            address,
            subject,
            body,
            max_bytes,
            headers,
        } = action
        else {
            return Ok(());
        };
        let variables = self.variables();
        let notification = Notification {
            address: address.clone(),
            subject: render(subject, variables),
            body: render(body, variables),
            max_body_bytes: *max_bytes,
            orig_headers: headers.clone(),
        };
        tracing::debug!(address = %notification.address, "sending notification");
        self.handler.notify(&notification)
    }

    /// Refuses outgoing mail that would loop back to this account.
    fn check_loop(&self, auto_reply: bool) -> Result<()> {
        let headers = self.message.headers();
        let forwarded = headers
            .get_all(FORWARDED_HEADER)
            .any(|v| v.trim().eq_ignore_ascii_case(&self.account));
        if forwarded {
            return Err(Error::MailLoop(format!(
                "message was already forwarded by {}",
                self.account
            )));
        }
        if auto_reply && is_auto_submitted(headers) {
            return Err(Error::MailLoop("message is auto-submitted".to_string()));
        }
        Ok(())
    }

    /// A failed outgoing action falls back to an explicit keep.
    fn degrade(&mut self, result: Result<()>, action: &str) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(Error::MailLoop(reason)) => {
                tracing::warn!(action, "mail loop detected: {reason}");
                self.handler.loop_detected(action, &reason);
                self.keep(KeepKind::Explicit)
            }
            Err(e) => {
                tracing::warn!(action, "action failed, keeping message: {e}");
                self.keep(KeepKind::Explicit)
            }
        }
    }

    fn already_filed(&self, path: &str) -> bool {
        self.filed_paths.iter().any(|p| same_path(p, path))
    }

    fn keep(&mut self, kind: KeepKind) -> Result<()> {
        let folder = normalize_path(self.handler.default_folder());
        if self.already_filed(&folder) {
            tracing::info!(folder = %folder, "ignoring second attempt to file message");
            return Ok(());
        }
        tracing::debug!(?kind, folder = %folder, flags = ?self.flags, tags = ?self.tags, "keeping message");
        let stored = match kind {
            KeepKind::Implicit => self.handler.implicit_keep(&self.flags, &self.tags)?,
            KeepKind::Explicit => self.handler.explicit_keep(&self.flags, &self.tags)?,
        };
        if let Some(stored) = stored {
            self.filed_paths.push(folder);
            self.added.push(stored);
        }
        Ok(())
    }

    fn file_into(&mut self, path: &str, own_flags: Vec<String>) -> Result<()> {
        let folder = normalize_path(path);
        if self.already_filed(&folder) {
            tracing::info!(folder = %folder, "ignoring second attempt to file message");
            return Ok(());
        }
        let mut flags = self.flags.clone();
        for flag in own_flags {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        tracing::info!(folder = %folder, "filing message");
        match self.handler.file_into(&folder, &flags, &self.tags) {
            Ok(Some(stored)) => {
                self.filed_paths.push(folder);
                self.added.push(stored);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(folder = %folder, "unable to file message, keeping it instead: {e}");
                self.keep(KeepKind::Explicit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluator::evaluate;
    use crate::engine::handler::{HandlerEvent, RecordingHandler};
    use crate::sieve::parser::parse;

    const INVOICE: &[u8] = b"From: billing@example.com\r\n\
Subject: Invoice 42\r\n\
Message-ID: <42@example.com>\r\n\r\n\
Amount due: 10 EUR\r\n";

    fn run_with(script: &str, raw: &[u8], handler: &mut RecordingHandler) -> Vec<MessageRef> {
        let script = parse(script).unwrap();
        let message = ParsedMessage::parse(raw);
        let evaluation = evaluate(&script, &message).unwrap();
        let mut dispatcher = ActionDispatcher::new(handler, &message, "me@example.com");
        assert_eq!(dispatcher.state(), DispatchState::NoActions);
        dispatcher.collect(evaluation);
        assert_eq!(dispatcher.state(), DispatchState::Collected);
        let added = dispatcher.dispatch().unwrap();
        assert_eq!(dispatcher.state(), DispatchState::Done);
        added
    }

    fn run(script: &str, raw: &[u8]) -> RecordingHandler {
        let mut handler = RecordingHandler::default();
        run_with(script, raw, &mut handler);
        handler
    }

    fn filed(folder: &str, flags: &[&str], tags: &[&str]) -> HandlerEvent {
        HandlerEvent::FiledInto {
            folder: folder.into(),
            flags: flags.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn explicit_keep() -> HandlerEvent {
        HandlerEvent::ExplicitKeep {
            folder: "Inbox".into(),
            flags: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_invoice_filed_once() {
        let handler = run(
            r#"require "fileinto";
if header :contains "Subject" "invoice" { fileinto "Bills"; }
"#,
            b"Subject: Re: invoice #4\r\n\r\nsee attached\r\n",
        );
        assert_eq!(handler.events, vec![filed("Bills", &[], &[])]);
    }

    #[test]
    fn test_duplicate_fileinto_merged() {
        let handler = run(
            r#"require ["fileinto", "imap4flags", "tag", "flag"];
fileinto :flags "\\Seen" "Bills";
tag "money";
fileinto :flags ["\\Answered"] "/bills/ ";
flag "flagged";
"#,
            INVOICE,
        );
        assert_eq!(handler.copies(), 1);
        assert_eq!(
            handler.events,
            vec![filed("Bills", &["flagged", "\\Seen", "\\Answered"], &["money"])]
        );
    }

    #[test]
    fn test_discard_only_stores_nothing() {
        let handler = run("discard;", INVOICE);
        assert_eq!(handler.events, vec![HandlerEvent::Discarded]);
        assert_eq!(handler.copies(), 0);
    }

    #[test]
    fn test_size_decides_discard() {
        let script = "if size :over 10M { discard; }";
        let mut big = b"Subject: big\r\n\r\n".to_vec();
        big.resize(12_000_000, b'x');
        assert_eq!(run(script, &big).events, vec![HandlerEvent::Discarded]);

        let mut small = b"Subject: small\r\n\r\n".to_vec();
        small.resize(9_000_000, b'x');
        let handler = run(script, &small);
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::ImplicitKeep { .. }]
        ));
    }

    #[test]
    fn test_forwarded_message_is_not_redirected() {
        let raw = b"X-Zimbra-Forwarded: ME@example.com\r\nSubject: loop\r\n\r\nbody";
        let handler = run("redirect \"other@example.com\";", raw);
        assert_eq!(
            handler.events,
            vec![
                HandlerEvent::LoopRefused {
                    action: "redirect".into(),
                    reason: "message was already forwarded by me@example.com".into(),
                },
                explicit_keep(),
            ]
        );
    }

    #[test]
    fn test_flags_and_tags_alone_keep_even_with_discard() {
        let handler = run(
            "require [\"tag\"]; tag \"seen\"; discard;",
            INVOICE,
        );
        assert_eq!(
            handler.events,
            vec![HandlerEvent::ExplicitKeep {
                folder: "Inbox".into(),
                flags: Vec::new(),
                tags: vec!["seen".into()],
            }]
        );
    }

    #[test]
    fn test_tag_without_discard_is_implicit_keep() {
        let handler = run("require [\"tag\"]; tag \"seen\";", INVOICE);
        assert!(matches!(
            handler.events.as_slice(),
            [HandlerEvent::ImplicitKeep { tags, .. }] if tags == &["seen".to_string()]
        ));
    }

    #[test]
    fn test_copy_fileinto_adds_explicit_keep() {
        let handler = run(
            "require [\"fileinto\", \"copy\"]; fileinto :copy \"Archive\";",
            INVOICE,
        );
        // the explicit keep fills the default folder, so the implicit keep is a no-op
        assert_eq!(handler.events, vec![explicit_keep(), filed("Archive", &[], &[])]);
    }

    #[test]
    fn test_keep_skipped_when_discarded() {
        let handler = run("keep; discard;", INVOICE);
        assert!(handler.events.is_empty());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/Bills/ "), "Bills");
        assert_eq!(normalize_path("a/b//"), "a/b");
        assert!(same_path("INBOX", "inbox"));
    }

    #[test]
    fn test_failed_fileinto_degrades_to_keep() {
        let mut handler = RecordingHandler::default();
        handler.failing_folders.push("Locked".into());
        let added = run_with(
            "require \"fileinto\"; fileinto \"Locked\";",
            INVOICE,
            &mut handler,
        );
        assert_eq!(handler.events, vec![explicit_keep()]);
        assert_eq!(added.len(), 1);
    }

    #[test]
    fn test_reply_rendered_and_refused_for_auto_submitted() {
        let script = "require \"reply\"; reply \"Got ${Subject}\";";
        let handler = run(script, INVOICE);
        assert_eq!(
            handler.events,
            vec![
                HandlerEvent::Replied("Got Invoice 42".into()),
                HandlerEvent::ImplicitKeep {
                    folder: "Inbox".into(),
                    flags: Vec::new(),
                    tags: Vec::new(),
                },
            ]
        );

        let raw = b"Auto-Submitted: auto-replied\r\nSubject: away\r\n\r\n";
        let handler = run(script, raw);
        assert_eq!(
            handler.events,
            vec![
                HandlerEvent::LoopRefused {
                    action: "reply".into(),
                    reason: "message is auto-submitted".into(),
                },
                explicit_keep(),
            ]
        );
    }

    #[test]
    fn test_notify_rendered() {
        let handler = run(
            "require \"notify\"; notify \"boss@example.com\" \"New: ${subject}\" \"${from} wrote\" 100 [\"Subject\"]; discard;",
            INVOICE,
        );
        assert_eq!(
            handler.events,
            vec![HandlerEvent::Notified(Notification {
                address: "boss@example.com".into(),
                subject: "New: Invoice 42".into(),
                body: "billing@example.com wrote".into(),
                max_body_bytes: Some(100),
                orig_headers: vec!["Subject".into()],
            })]
        );
    }

    #[test]
    fn test_dispatch_twice_is_an_error() {
        let mut handler = RecordingHandler::default();
        let message = ParsedMessage::parse(INVOICE);
        let mut dispatcher = ActionDispatcher::new(&mut handler, &message, "me");
        assert!(dispatcher.dispatch().is_err());
    }
}
