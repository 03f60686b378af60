pub mod method;
pub mod types;

pub use method::HttpMethod;
pub use types::*;
