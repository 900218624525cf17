//! SAM line codec: request builders and response tokenizer.

pub mod command;
pub mod options;
pub mod reply;

pub use command::Command;
pub use options::SessionOptions;
pub use reply::Reply;
