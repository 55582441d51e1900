mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::{run_wrfda_update_bc, BoundaryMode};
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Run WRFDA da_update_bc.exe to update the boundary conditions after an analysis"
)]
struct Args {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, default_value = "lateral", help = "Boundary to update: lateral or low")]
    mode: BoundaryMode,
}

fn main() {
    let args = Args::parse();
    run_main("run_wrfda_update_bc", || {
        let (config, ctx) = args.run.load()?;
        run_wrfda_update_bc(&ctx, &config, args.mode, None).map(|_| ())
    });
}
