//! Sieve script tokenizer (RFC 5228).
use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A `:tag` like `:is`, `:contains`, `:over`, `:copy`, etc. Always lower-cased.
    Tag(String),
    /// An unquoted identifier like `if`, `header`, `allof`, `fileinto`, etc.
    Identifier(String),
    /// A double-quoted string with escapes resolved.
    QuotedString(String),
    /// A multi-line string `text:\r\n...\r\n.\r\n`, dot-unstuffed.
    MultiLineString(String),
    /// A numeric value, possibly with K/M/G suffix.
    Number(String),
    /// A `# ...` single-line comment.
    Comment(String),
    /// A `/* ... */` block comment.
    BlockComment(String),
    Semicolon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
}

#[derive(Debug, Clone)]
pub struct Span {
    pub token: Token,
    pub offset: usize,
    pub len: usize,
}

fn punct(byte: u8) -> Option<Token> {
    Some(match byte {
        b';' => Token::Semicolon,
        b',' => Token::Comma,
        b'(' => Token::LParen,
        b')' => Token::RParen,
        b'{' => Token::LBrace,
        b'}' => Token::RBrace,
        b'[' => Token::LBracket,
        b']' => Token::RBracket,
        _ => return None,
    })
}

pub fn tokenize(input: &str) -> Result<Vec<Span>, CompileError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        if let Some(token) = punct(bytes[i]) {
            tokens.push(Span { token, offset: start, len: 1 });
            i += 1;
            continue;
        }

        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                let text = &input[start + 1..i];
                tokens.push(Span {
                    token: Token::Comment(text.trim().to_string()),
                    offset: start,
                    len: i - start,
                });
            }

            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                let comment_start = i;
                loop {
                    if i + 1 >= bytes.len() {
                        return Err(CompileError::new(start, "Unterminated block comment"));
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        break;
                    }
                    i += 1;
                }
                let text = &input[comment_start..i];
                i += 2;
                tokens.push(Span {
                    token: Token::BlockComment(text.trim().to_string()),
                    offset: start,
                    len: i - start,
                });
            }

            b'"' => {
                i += 1;
                let mut s = String::new();
                let mut chunk = i;
                loop {
                    if i >= bytes.len() {
                        return Err(CompileError::new(start, "Unterminated string"));
                    }
                    match bytes[i] {
                        b'\\' if i + 1 < bytes.len() => {
                            // `\x` is `x` for any x; only `\\` and `\"` matter in practice
                            s.push_str(&input[chunk..i]);
                            let next = next_char_len(input, i + 1);
                            s.push_str(&input[i + 1..i + 1 + next]);
                            i += 1 + next;
                            chunk = i;
                        }
                        b'"' => {
                            s.push_str(&input[chunk..i]);
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                tokens.push(Span {
                    token: Token::QuotedString(s),
                    offset: start,
                    len: i - start,
                });
            }

            b't' | b'T'
                if i + 4 < bytes.len() && bytes[i..i + 5].eq_ignore_ascii_case(b"text:") =>
            {
                i += 5;
                // The rest of the `text:` line may only hold whitespace or a comment.
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                if i < bytes.len() {
                    i += 1;
                }
                let mut body = String::new();
                loop {
                    if i >= bytes.len() {
                        return Err(CompileError::new(start, "Unterminated multi-line string"));
                    }
                    let line_end = memchr::memchr(b'\n', &bytes[i..])
                        .map(|p| i + p + 1)
                        .unwrap_or(bytes.len());
                    let line = &input[i..line_end];
                    let content = line.trim_end_matches(['\r', '\n']);
                    i = line_end;
                    if content == "." {
                        break;
                    }
                    // dot-unstuffing: a leading ".." stands for "."
                    match content.strip_prefix("..") {
                        Some(rest) => {
                            body.push('.');
                            body.push_str(rest);
                            body.push_str(&line[content.len()..]);
                        }
                        None => body.push_str(line),
                    }
                }
                // The line break before the terminating dot belongs to the terminator.
                if body.ends_with('\n') {
                    body.pop();
                    if body.ends_with('\r') {
                        body.pop();
                    }
                }
                tokens.push(Span {
                    token: Token::MultiLineString(body),
                    offset: start,
                    len: i - start,
                });
            }

            b':' => {
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if i == start + 1 {
                    return Err(CompileError::new(start, "Empty tag"));
                }
                tokens.push(Span {
                    token: Token::Tag(input[start..i].to_lowercase()),
                    offset: start,
                    len: i - start,
                });
            }

            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i < bytes.len() && matches!(bytes[i], b'K' | b'k' | b'M' | b'm' | b'G' | b'g')
                {
                    i += 1;
                }
                tokens.push(Span {
                    token: Token::Number(input[start..i].to_string()),
                    offset: start,
                    len: i - start,
                });
            }

            _ if bytes[i].is_ascii_alphabetic() || bytes[i] == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Span {
                    token: Token::Identifier(input[start..i].to_string()),
                    offset: start,
                    len: i - start,
                });
            }

            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(CompileError::new(
                    start,
                    format!("Unexpected character '{ch}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn next_char_len(input: &str, at: usize) -> usize {
    input[at..].chars().next().map(char::len_utf8).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_tokens() {
        let tokens = tokenize("require \"fileinto\";").unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(matches!(&tokens[0].token, Token::Identifier(s) if s == "require"));
        assert!(matches!(&tokens[1].token, Token::QuotedString(s) if s == "fileinto"));
        assert!(matches!(&tokens[2].token, Token::Semicolon));
    }

    #[test]
    fn test_tags_are_lowercased() {
        let tokens = tokenize("header :Contains \"Subject\" \"SPAM\"").unwrap();
        assert_eq!(tokens.len(), 4);
        assert!(matches!(&tokens[1].token, Token::Tag(s) if s == ":contains"));
    }

    #[test]
    fn test_comment() {
        let tokens = tokenize("# Move spam\nkeep;").unwrap();
        assert!(matches!(&tokens[0].token, Token::Comment(s) if s == "Move spam"));
    }

    #[test]
    fn test_escapes_and_utf8() {
        let tokens = tokenize(r#""a \"quoted\" back\\slash ünï""#).unwrap();
        assert!(
            matches!(&tokens[0].token, Token::QuotedString(s) if s == "a \"quoted\" back\\slash ünï")
        );
    }

    #[test]
    fn test_number_with_suffix() {
        let tokens = tokenize("100K").unwrap();
        assert!(matches!(&tokens[0].token, Token::Number(s) if s == "100K"));
    }

    #[test]
    fn test_multiline_string_is_unstuffed() {
        let input = "reply text:\r\nHello\r\n..signature\r\n.\r\n;";
        let tokens = tokenize(input).unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(
            matches!(&tokens[1].token, Token::MultiLineString(s) if s == "Hello\r\n.signature")
        );
        assert!(matches!(&tokens[2].token, Token::Semicolon));
    }

    #[test]
    fn test_unterminated_string_reports_offset() {
        let err = tokenize("keep; \"open").unwrap_err();
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("if header @ {").unwrap_err();
        assert_eq!(err.offset, 10);
        assert!(err.message.contains('@'));
    }
}
