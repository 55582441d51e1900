//! Configure and compile the model family from source trees, answering the
//! interactive `configure` menus from registered scripts.

pub mod functions;
pub mod models;

pub use functions::{build_all, build_tool, discover_build_env, wps_plan, wrf_plan, wrfda_plan, wrfplus_plan};
pub use models::{BuildOptions, BuildPlan, CompilerSuite, InteractionScript, Tool};
