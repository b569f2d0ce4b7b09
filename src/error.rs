/// A rule script that failed to compile, with the position of the offending input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}{}", location(.line, .column, .offset))]
pub struct CompileError {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            line: 0,
            column: 0,
            message: message.into(),
        }
    }

    /// Fill in line/column (both 1-based) from the source the offset points into.
    pub fn locate(mut self, input: &str) -> Self {
        let end = self.offset.min(input.len());
        let before = &input.as_bytes()[..end];
        self.line = before.iter().filter(|&&b| b == b'\n').count() + 1;
        let line_start = before
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(0);
        self.column = end - line_start + 1;
        self
    }
}

/// Line and column once located, the raw byte offset before that.
fn location(line: &usize, column: &usize, offset: &usize) -> String {
    if *line > 0 {
        format!(" (line {line}, column {column})")
    } else {
        format!(" at offset {offset}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Parse error: {0}")]
    Compile(#[from] CompileError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
    #[error("Mail loop detected: {0}")]
    MailLoop(String),
}

pub type Result<T> = std::result::Result<T, Error>;
