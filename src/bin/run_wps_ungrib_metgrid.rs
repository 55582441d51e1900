mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_wps_ungrib_metgrid;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run WPS ungrib.exe and metgrid.exe on the background data")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_wps_ungrib_metgrid", || {
        let (config, ctx) = args.run.load()?;
        run_wps_ungrib_metgrid(&ctx, &config).map(|_| ())
    });
}
