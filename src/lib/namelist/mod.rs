pub mod models;
pub mod parser;
pub mod patch;

pub use models::{Group, Namelist, Scalar, Value};
pub use patch::PatchSet;
