mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::pipeline::{cycle_dir, warm_cycle};
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Run one cycle of the 3-hour warm start assimilation",
    long_about = "Run one 3-hour cycle in <work-root>/<YYYYMMDDHH>. The forecast of the previous \
cycle is the first guess when present. Conventional observations are assimilated on every domain, \
radar observations on d01, then WRF runs from the analysis."
)]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_3hr_cycle", || {
        let (config, ctx) = args.run.load()?;
        let cycle_ctx = ctx.with_work_root(cycle_dir(&ctx.work_root, config.start_time));
        warm_cycle(&ctx, &cycle_ctx, &config)
            .run()
            .into_result()
            .map(|_| ())
    });
}
