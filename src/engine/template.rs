//! `${name}` substitution for reply and notify texts.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::message::ParsedMessage;

lazy_static! {
    static ref VARIABLE: Regex = Regex::new(r"\$\{([^}]*)\}").expect("valid regex");
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Replaces each `${name}` with its value. Names are looked up lower-cased and
/// unknown ones become empty; text that is not a valid name is left alone.
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    VARIABLE
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            if is_identifier(name) {
                variables
                    .get(&name.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_default()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Every header (first occurrence, decoded) under its lower-cased name, plus
/// `subject` and `body`.
pub fn message_variables(message: &ParsedMessage) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    for header in message.headers().iter() {
        let key = header.name.to_ascii_lowercase();
        if !variables.contains_key(&key) {
            let value = crate::mime::header::decode_encoded_words(&header.value);
            variables.insert(key, value);
        }
    }
    variables.insert("subject".to_string(), message.subject().to_string());
    variables.insert("body".to_string(), message.body_text().to_string());
    variables
}
