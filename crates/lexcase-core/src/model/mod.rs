mod case;
mod conversation;
mod document;

pub use case::*;
pub use conversation::*;
pub use document::*;
