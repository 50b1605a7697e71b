pub mod errors;
pub mod problem;
pub mod problems;
pub mod record;

pub use errors::*;
pub use problem::*;
pub use problems::*;
pub use record::*;
