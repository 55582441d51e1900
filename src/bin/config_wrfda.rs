mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::config_wrfda;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Edit WRFDA namelist.input for the assimilated domain")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("config_wrfda", || {
        let (config, ctx) = args.run.load()?;
        config_wrfda(&ctx, &config, None)
    });
}
