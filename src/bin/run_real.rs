mod common;

use std::path::PathBuf;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_real;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run WRF real.exe on the metgrid outputs")]
struct Args {
    #[command(flatten)]
    run: RunArgs,

    #[arg(long, help = "Directory with met_em files, <work-root>/wps by default")]
    wps_dir: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    run_main("run_real", || {
        let (config, ctx) = args.run.load()?;
        let wps_dir = args
            .wps_dir
            .clone()
            .unwrap_or_else(|| ctx.work_root.join("wps"));
        run_real(&ctx, &config, &wps_dir).map(|_| ())
    });
}
