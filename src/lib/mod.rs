pub mod config;
pub mod constants;
pub mod helpers;
pub mod installer;
pub mod io;
pub mod namelist;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod stages;
pub mod version;
