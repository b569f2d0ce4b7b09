pub mod ast;
pub mod converter;
pub mod emitter;
pub mod lexer;
pub mod parser;
pub mod rewrite;
pub mod visitor;
