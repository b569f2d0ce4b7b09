pub mod enums;
pub mod rule;
pub mod script;
