mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::config_wrfplus;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Edit WRFPLUS namelist.input for an adjoint run")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("config_wrfplus", || {
        let (config, ctx) = args.run.load()?;
        config_wrfplus(&ctx, &config)
    });
}
