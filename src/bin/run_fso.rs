mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::pipeline::{fso, FsoBranches};
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Run a forecast sensitivity to observations experiment",
    long_about = "Run the background forecast (fb), the analysis forecast (fa) and the reference \
analysis (ref) in the work root, integrate the adjoint model for both forecasts and estimate the \
observation impact with WRFDA in <work-root>/sens."
)]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_fso", || {
        let (config, ctx) = args.run.load()?;
        let branches = FsoBranches::new(&ctx, &config);
        fso(&ctx, &branches, &config).run().into_result().map(|_| ())
    });
}
