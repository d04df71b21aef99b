pub mod call;
pub mod conversation;
pub mod function;
pub mod module;
