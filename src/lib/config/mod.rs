pub mod builder;
pub mod models;
pub mod time;

pub use builder::{default_time_step, Root, Settings};
pub use models::{Config, OneOrMany, RawConfig, Section};
