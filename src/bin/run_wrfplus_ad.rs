mod common;

use clap::Parser;
use common::{run_main, RunArgs};
use wrf_scripts::stages::run_wrfplus_ad;
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Run the WRFPLUS adjoint model backward from final_sens_d01")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() {
    let args = Args::parse();
    run_main("run_wrfplus_ad", || {
        let (config, ctx) = args.run.load()?;
        run_wrfplus_ad(&ctx, &config).map(|_| ())
    });
}
