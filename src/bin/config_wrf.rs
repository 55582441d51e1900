mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::config_wrf;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Edit WRF namelist.input for a run")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("config_wrf", || {
        let (config, ctx) = args.run.load()?;
        config_wrf(&ctx, &config)
    });
}
