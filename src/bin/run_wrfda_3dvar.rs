mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_wrfda_3dvar;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run WRFDA da_wrfvar.exe for a 3D-Var analysis")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_wrfda_3dvar", || {
        let (config, ctx) = args.run.load()?;
        run_wrfda_3dvar(&ctx, &config, None, None).map(|_| ())
    });
}
