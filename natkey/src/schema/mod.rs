mod normalize;
mod parser;
mod types;

pub use normalize::{normalize, parse_shorthand, resolve_type};
pub use parser::{load_schema, load_schema_str, parse_schema, parse_schema_str};
pub use types::*;
