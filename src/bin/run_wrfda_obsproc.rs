mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_wrfda_obsproc;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run WRFDA obsproc.exe on LITTLE_R observations")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_wrfda_obsproc", || {
        let (config, ctx) = args.run.load()?;
        run_wrfda_obsproc(&ctx, &config).map(|_| ())
    });
}
