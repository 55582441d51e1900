mod common;

use std::collections::HashMap;
use std::env::vars;

use clap::Parser;
use common::{run_main, RootArgs};
use wrf_scripts::installer::{build_all, BuildOptions, CompilerSuite};
use wrf_scripts::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, long_version = LONG_VERSION, about = "Build WRF, WPS, WRFPLUS and WRFDA")]
struct Args {
    #[command(flatten)]
    roots: RootArgs,

    #[arg(short = 's', long, required = true, help = "Compiler suite: gnu, intel or pgi")]
    compiler_suite: CompilerSuite,

    #[arg(long, help = "Use hybrid vertical coordinate")]
    use_hyb: bool,

    #[arg(long, help = "Use GRIB IO capability of WRF")]
    use_grib: bool,

    #[arg(long, help = "Use OpenMP parallelism")]
    openmp: bool,

    #[arg(short = 'd', long, help = "Build with debug compile options")]
    debug: bool,

    #[arg(short = 'f', long, help = "Force to rebuild if already built")]
    force: bool,

    #[arg(short = 'v', long, help = "Print out build log")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    run_main("build_wrf", || {
        let env: HashMap<String, String> = vars().collect();
        let settings = args.roots.settings(env);
        let options = BuildOptions {
            force: args.force,
            verbose: args.verbose,
            use_hyb: args.use_hyb,
            use_grib: args.use_grib,
            openmp: args.openmp,
            debug: args.debug,
            ..BuildOptions::new(args.compiler_suite)
        };
        build_all(&settings, &options)
    });
}
