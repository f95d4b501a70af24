pub mod shell;
pub mod tokenize;
pub mod types;

pub use shell::inspect;
pub use tokenize::{basename, leading_token, tokenize};
pub use types::{CommandNode, Inspection, Redirection};
