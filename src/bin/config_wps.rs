mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::config_wps;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Edit WPS namelist.wps for a run")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("config_wps", || {
        let (config, ctx) = args.run.load()?;
        config_wps(&ctx, &config)
    });
}
