pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "tools: WRF, WPS, WRFDA, WRFPLUS",
    "\n",
    "backends: local, slurm, pbs"
);
