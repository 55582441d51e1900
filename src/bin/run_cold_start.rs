mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::pipeline::cold_start;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Run WPS, real, 3D-Var and WRF from a fresh background",
    long_about = "Run the whole cold start chain in the work root: WPS from the latest \
background cycle, real.exe, conventional 3D-Var on every domain, lateral boundary update and \
the WRF forecast. Stages whose outputs already exist are skipped unless --force is given."
)]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_cold_start", || {
        let (config, ctx) = args.run.load()?;
        cold_start(&ctx, &config).run().into_result().map(|_| ())
    });
}
