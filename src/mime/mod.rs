pub mod body;
pub mod encoding;
pub mod header;
pub mod parser;
pub mod part;

pub use parser::parse;
pub use part::{AnalysisFailure, FailureKind, MimeTree, PartId, PartInfo};
