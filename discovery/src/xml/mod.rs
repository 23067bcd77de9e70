//! Streaming XML decoding into a navigable tree, plus a restricted path query.

mod error;
mod node;
mod parser;
mod query;

pub use error::{XmlParseError, XmlParseResult};
pub use node::{XmlDocument, XmlNode};
pub use parser::parse;
pub use query::query;
