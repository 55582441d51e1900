mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_wps_geogrid;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run WPS geogrid.exe to create static domain data")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_wps_geogrid", || {
        let (config, ctx) = args.run.load()?;
        run_wps_geogrid(&ctx, &config).map(|_| ())
    });
}
