use std::fmt;

use crate::error::{Error, Result};

/// Identifies a delivered copy of the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(pub String);

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rendered notify action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub address: String,
    pub subject: String,
    pub body: String,
    pub max_body_bytes: Option<u64>,
    pub orig_headers: Vec<String>,
}

/// The mailbox side of filtering: where actions end up.
///
/// Keep and file methods return `None` when the store recognized the message as a
/// duplicate and made no new copy.
pub trait DeliveryHandler {
    fn default_folder(&self) -> &str;

    fn before_filtering(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_filtering(&mut self) -> Result<()> {
        Ok(())
    }

    fn discard(&mut self) -> Result<()>;

    /// Delivery when no rule took the message. Stores may apply spam filing here.
    fn implicit_keep(&mut self, flags: &[String], tags: &[String]) -> Result<Option<MessageRef>>;

    fn explicit_keep(&mut self, flags: &[String], tags: &[String]) -> Result<Option<MessageRef>>;

    fn file_into(
        &mut self,
        path: &str,
        flags: &[String],
        tags: &[String],
    ) -> Result<Option<MessageRef>>;

    fn redirect(&mut self, address: &str) -> Result<()>;

    fn reply(&mut self, body: &str) -> Result<()>;

    fn notify(&mut self, notification: &Notification) -> Result<()>;

    /// An outgoing action was refused because the message would loop. The message is
    /// kept afterwards.
    fn loop_detected(&mut self, _action: &str, _reason: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    Discarded,
    ImplicitKeep {
        folder: String,
        flags: Vec<String>,
        tags: Vec<String>,
    },
    ExplicitKeep {
        folder: String,
        flags: Vec<String>,
        tags: Vec<String>,
    },
    FiledInto {
        folder: String,
        flags: Vec<String>,
        tags: Vec<String>,
    },
    Redirected(String),
    Replied(String),
    Notified(Notification),
    LoopRefused {
        action: String,
        reason: String,
    },
}

fn write_delivery(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    folder: &str,
    flags: &[String],
    tags: &[String],
) -> fmt::Result {
    write!(f, "{kind} {folder}")?;
    if !flags.is_empty() {
        write!(f, " flags={}", flags.join(","))?;
    }
    if !tags.is_empty() {
        write!(f, " tags={}", tags.join(","))?;
    }
    Ok(())
}

impl fmt::Display for HandlerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discarded => f.write_str("discard"),
            Self::ImplicitKeep { folder, flags, tags } => {
                write_delivery(f, "implicit-keep", folder, flags, tags)
            }
            Self::ExplicitKeep { folder, flags, tags } => {
                write_delivery(f, "explicit-keep", folder, flags, tags)
            }
            Self::FiledInto { folder, flags, tags } => {
                write_delivery(f, "fileinto", folder, flags, tags)
            }
            Self::Redirected(address) => write!(f, "redirect {address}"),
            Self::Replied(body) => write!(f, "reply {body:?}"),
            Self::Notified(n) => write!(f, "notify {} {:?}", n.address, n.subject),
            Self::LoopRefused { action, reason } => write!(f, "loop-refused {action}: {reason}"),
        }
    }
}

/// In-memory handler that records what it was asked to do.
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    default_folder: String,
    pub events: Vec<HandlerEvent>,
    /// Folders whose delivery fails, to exercise error paths
    pub failing_folders: Vec<String>,
    pub fail_redirects: bool,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new("Inbox")
    }
}

impl RecordingHandler {
    pub fn new(default_folder: impl Into<String>) -> Self {
        Self {
            default_folder: default_folder.into(),
            events: Vec::new(),
            failing_folders: Vec::new(),
            fail_redirects: false,
        }
    }

    /// Number of copies stored in any folder.
    pub fn copies(&self) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    HandlerEvent::ImplicitKeep { .. }
                        | HandlerEvent::ExplicitKeep { .. }
                        | HandlerEvent::FiledInto { .. }
                )
            })
            .count()
    }

    fn store(&mut self, event: HandlerEvent) -> Result<Option<MessageRef>> {
        let folder = match &event {
            HandlerEvent::ImplicitKeep { folder, .. }
            | HandlerEvent::ExplicitKeep { folder, .. }
            | HandlerEvent::FiledInto { folder, .. } => folder.clone(),
            _ => return Ok(None),
        };
        if self.failing_folders.iter().any(|f| f.eq_ignore_ascii_case(&folder)) {
            return Err(Error::Delivery(format!("folder {folder} is not writable")));
        }
        self.events.push(event);
        Ok(Some(MessageRef(format!("{}:{}", folder, self.events.len()))))
    }
}

impl DeliveryHandler for RecordingHandler {
    fn default_folder(&self) -> &str {
        &self.default_folder
    }

    fn discard(&mut self) -> Result<()> {
        self.events.push(HandlerEvent::Discarded);
        Ok(())
    }

    fn implicit_keep(&mut self, flags: &[String], tags: &[String]) -> Result<Option<MessageRef>> {
        self.store(HandlerEvent::ImplicitKeep {
            folder: self.default_folder.clone(),
            flags: flags.to_vec(),
            tags: tags.to_vec(),
        })
    }

    fn explicit_keep(&mut self, flags: &[String], tags: &[String]) -> Result<Option<MessageRef>> {
        self.store(HandlerEvent::ExplicitKeep {
            folder: self.default_folder.clone(),
            flags: flags.to_vec(),
            tags: tags.to_vec(),
        })
    }

    fn file_into(
        &mut self,
        path: &str,
        flags: &[String],
        tags: &[String],
    ) -> Result<Option<MessageRef>> {
        self.store(HandlerEvent::FiledInto {
            folder: path.to_string(),
            flags: flags.to_vec(),
            tags: tags.to_vec(),
        })
    }

    fn redirect(&mut self, address: &str) -> Result<()> {
        if self.fail_redirects {
            return Err(Error::Delivery(format!("cannot redirect to {address}")));
        }
        self.events.push(HandlerEvent::Redirected(address.to_string()));
        Ok(())
    }

    fn reply(&mut self, body: &str) -> Result<()> {
        self.events.push(HandlerEvent::Replied(body.to_string()));
        Ok(())
    }

    fn notify(&mut self, notification: &Notification) -> Result<()> {
        self.events.push(HandlerEvent::Notified(notification.clone()));
        Ok(())
    }

    fn loop_detected(&mut self, action: &str, reason: &str) {
        self.events.push(HandlerEvent::LoopRefused {
            action: action.to_string(),
            reason: reason.to_string(),
        });
    }
}
