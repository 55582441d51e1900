mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_wrf;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run WRF wrf.exe from the analysis or real.exe outputs")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_wrf", || {
        let (config, ctx) = args.run.load()?;
        run_wrf(&ctx, &config).map(|_| ())
    });
}
