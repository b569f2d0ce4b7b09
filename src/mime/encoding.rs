use std::borrow::Cow;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use encoding_rs::{Encoding, UTF_8};

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Content-Transfer-Encoding after repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
}

impl TransferEncoding {
    /// Parses a declared encoding. Anything but the five legal tokens is dropped,
    /// as is any encoding on a container part.
    pub fn repair(declared: Option<&str>, is_container: bool) -> Self {
        let Some(declared) = declared.map(str::trim).filter(|d| !d.is_empty()) else {
            return Self::default();
        };
        let parsed = match declared.to_ascii_lowercase().as_str() {
            "7bit" => Some(Self::SevenBit),
            "8bit" => Some(Self::EightBit),
            "binary" => Some(Self::Binary),
            "quoted-printable" => Some(Self::QuotedPrintable),
            "base64" => Some(Self::Base64),
            _ => None,
        };
        match parsed {
            Some(encoding) if is_container && encoding.is_encoded() => {
                tracing::debug!(encoding = declared, "transfer encoding on container removed");
                Self::default()
            }
            Some(encoding) => encoding,
            None => {
                tracing::debug!(encoding = declared, "unknown transfer encoding removed");
                Self::default()
            }
        }
    }

    pub fn is_encoded(self) -> bool {
        matches!(self, Self::QuotedPrintable | Self::Base64)
    }

    pub fn decode<'a>(self, data: &'a [u8]) -> Cow<'a, [u8]> {
        match self {
            Self::Base64 => Cow::Owned(decode_base64(data)),
            Self::QuotedPrintable => Cow::Owned(decode_quoted_printable(data)),
            _ => Cow::Borrowed(data),
        }
    }
}

/// Decodes base64, ignoring anything outside the alphabet and any padding.
pub fn decode_base64(data: &[u8]) -> Vec<u8> {
    let mut cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
        .collect();
    // a single dangling sextet cannot form a byte
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }
    match LENIENT_BASE64.decode(&cleaned) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!("base64 decoding failed: {e}");
            Vec::new()
        }
    }
}

pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    match quoted_printable::decode(data, quoted_printable::ParseMode::Robust) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!("quoted-printable decoding failed: {e}");
            data.to_vec()
        }
    }
}

/// Decodes text in the declared charset, falling back to detection and then to
/// `default_charset`, then UTF-8.
pub fn decode_text(data: &[u8], declared: Option<&str>, default_charset: Option<&str>) -> String {
    if let Some(encoding) = declared.and_then(|cs| Encoding::for_label(cs.trim().as_bytes())) {
        return encoding.decode_with_bom_removal(data).0.into_owned();
    }
    if let Some(encoding) = detect_charset(data) {
        return encoding.decode_with_bom_removal(data).0.into_owned();
    }
    let fallback = default_charset
        .and_then(|cs| Encoding::for_label(cs.trim().as_bytes()))
        .unwrap_or(UTF_8);
    fallback.decode_with_bom_removal(data).0.into_owned()
}

/// A detected charset, trusted only for non-ASCII input that decodes cleanly.
fn detect_charset(data: &[u8]) -> Option<&'static Encoding> {
    if data.is_ascii() {
        return None;
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(data, true);
    let guess = detector.guess(None, true);
    let (_, had_errors) = guess.decode_without_bom_handling(data);
    if had_errors {
        tracing::debug!(charset = guess.name(), "charset guess rejected");
        None
    } else {
        Some(guess)
    }
}
