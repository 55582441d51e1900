use std::{
    collections::BTreeMap,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{info, warn};

use crate::config::Settings;
use crate::helpers::{check_files, tool_version, Version, WrfError};
use crate::namelist::PatchSet;
use crate::runner::{run_step, Step, StepOutcome};

use super::models::{BuildOptions, BuildPlan, CompilerSuite, InteractionScript, Tool};

const SELECTION_PROMPT: &str = r"Enter selection.*";
const NESTING_PROMPT: &str = r"Compile for nesting.*:";

const WRFDA_EXECUTABLES: [&str; 10] = [
    "var/build/da_advance_time.exe",
    "var/build/da_update_bc.exe",
    "var/build/da_update_bc_ad.exe",
    "var/build/da_verif_grid.exe",
    "var/build/da_verif_obs.exe",
    "var/build/da_wrfvar.exe",
    "var/build/gen_be_diags.exe",
    "var/build/gen_be_stage0_wrf.exe",
    "var/build/gen_be_stage4_regional.exe",
    "var/obsproc/src/obsproc.exe",
];

/// `configure` menu entry of WRF, distributed memory (+ shared memory with
/// OpenMP).
pub fn wrf_selection(suite: CompilerSuite, openmp: bool) -> &'static str {
    if cfg!(target_os = "macos") {
        return "15";
    }
    match (suite, openmp) {
        (CompilerSuite::Intel, false) => "15",
        (CompilerSuite::Intel, true) => "16",
        (CompilerSuite::Gnu, false) => "34",
        (CompilerSuite::Gnu, true) => "35",
        (CompilerSuite::Pgi, false) => "54",
        (CompilerSuite::Pgi, true) => "55",
    }
}

pub fn wps_selection(suite: CompilerSuite) -> &'static str {
    match suite {
        CompilerSuite::Intel => "19",
        CompilerSuite::Gnu => "3",
        CompilerSuite::Pgi => "7",
    }
}

/// The WRFPLUS menu was renumbered after 3.6.1.
pub fn wrfplus_selection(suite: CompilerSuite, version: Version) -> &'static str {
    match suite {
        CompilerSuite::Intel if version <= Version::new(3, 6, 1) => "8",
        CompilerSuite::Intel => "34",
        CompilerSuite::Gnu => "18",
        CompilerSuite::Pgi => "28",
    }
}

pub fn wrfda_selection(suite: CompilerSuite) -> &'static str {
    match suite {
        CompilerSuite::Intel => "8",
        CompilerSuite::Gnu => "18",
        CompilerSuite::Pgi => "28",
    }
}

/// `iand(i,i-1)` in the bundled g2 library does not compile with recent
/// gfortran: each of the four kind variants gets its own literal suffix.
pub fn intmath_patches() -> Result<Vec<PatchSet>, WrfError> {
    ["_8", "_4", "_2", "_1"]
        .iter()
        .map(|suffix| {
            Ok(PatchSet::new()
                .add_literal(r"iand\(i,i-1\)/=0", &format!("iand(i,i-1{suffix})/=0"))?
                .return_on_first_match())
        })
        .collect()
}

/// OpenMPI needs `MPI2_SUPPORT` for the C side of the RSL layer.
pub fn dm_cc_patch() -> Result<PatchSet, WrfError> {
    PatchSet::new().add_literal(r"DM_CC\s*=\s*mpicc\s*$", "DM_CC = mpicc -DMPI2_SUPPORT")
}

/// Compiler names written by `configure` replaced with the MPI wrappers
/// of the suite.
pub fn compiler_patch(suite: CompilerSuite) -> Result<Option<PatchSet>, WrfError> {
    Ok(match suite {
        CompilerSuite::Intel => Some(
            PatchSet::new()
                .add_literal("mpif90", "mpiifort")?
                .add_literal("mpicc", "mpiicc")?,
        ),
        CompilerSuite::Pgi => Some(
            PatchSet::new()
                .add_literal("pgf90", "pgfortran")?
                .add_literal("mpif90", "mpifort")?,
        ),
        CompilerSuite::Gnu => None,
    })
}

fn debug_patch(suite: CompilerSuite) -> Result<PatchSet, WrfError> {
    let options = match suite {
        CompilerSuite::Intel => "-O0 -g -traceback",
        _ => "-O0 -g -fbacktrace",
    };
    PatchSet::new().add_literal(
        r"FCFLAGS\s*=\s*\$\(FCOPTIM\)\s*\$\(FCBASEOPTS\)",
        &format!("FCFLAGS = {options} $(FCBASEOPTS)"),
    )
}

fn grib2_patch() -> Result<PatchSet, WrfError> {
    PatchSet::new().add_literal(
        r#"\$I_really_want_to_output_grib2_from_WRF = "FALSE""#,
        r#"$I_really_want_to_output_grib2_from_WRF = "TRUE""#,
    )
}

fn seed_patch() -> Result<PatchSet, WrfError> {
    PatchSet::new().add_literal(
        r"integer,  dimension \(12\) :: seed",
        "integer,  dimension (33) :: seed",
    )
}

/// Patches of the file `configure` writes for WRF, WRFPLUS and WRFDA.
fn configure_wrf_patches(
    root: &Path,
    options: &BuildOptions,
) -> Result<Vec<(PathBuf, PatchSet)>, WrfError> {
    let configure_wrf = root.join("configure.wrf");
    let mut patches = vec![];
    if let Some(patch) = compiler_patch(options.suite)? {
        patches.push((configure_wrf.clone(), patch));
    }
    patches.push((configure_wrf.clone(), dm_cc_patch()?));
    if options.debug {
        patches.push((configure_wrf, debug_patch(options.suite)?));
    }
    Ok(patches)
}

fn expected(root: &Path, files: &[&str]) -> Vec<PathBuf> {
    files.iter().map(|f| root.join(f)).collect()
}

pub fn wrf_plan(root: &Path, version: Version, options: &BuildOptions) -> Result<BuildPlan, WrfError> {
    let mut source_patches = vec![];
    if Version::new(3, 6, 1) <= version && version <= Version::new(3, 8, 1) {
        source_patches.push((root.join("phys/module_cu_g3.F"), seed_patch()?));
    }
    if options.use_grib {
        source_patches.push((root.join("arch/Config.pl"), grib2_patch()?));
    }
    Ok(BuildPlan {
        tool: Tool::Wrf,
        root: root.to_path_buf(),
        configure_args: if options.use_hyb {
            vec!["-hyb".to_string()]
        } else {
            vec![]
        },
        script: InteractionScript::new()
            .expect(SELECTION_PROMPT, wrf_selection(options.suite, options.openmp))?
            .expect(NESTING_PROMPT, "1")?,
        source_patches,
        configure_patches: configure_wrf_patches(root, options)?,
        compile_target: Some("em_real".to_string()),
        expected: expected(
            root,
            &["main/wrf.exe", "main/real.exe", "main/ndown.exe", "main/tc.exe"],
        ),
    })
}

pub fn wps_plan(root: &Path, wrf_root: &Path, options: &BuildOptions) -> Result<BuildPlan, WrfError> {
    let configure_wps = root.join("configure.wps");
    let mut configure_patches = vec![];
    match compiler_patch(options.suite)? {
        Some(patch) => configure_patches.push((configure_wps.clone(), patch)),
        None => configure_patches.push((
            configure_wps.clone(),
            PatchSet::new()
                .add(r"mpicc -cc=.*", "mpicc")?
                .add(r"mpif90 -f90=.*", "mpif90")?,
        )),
    }
    configure_patches.push((
        configure_wps.clone(),
        PatchSet::new().add_literal(
            r"^WRF_DIR\s*=.*",
            &format!("WRF_DIR = {}", wrf_root.display()),
        )?,
    ));
    configure_patches.push((configure_wps, dm_cc_patch()?));
    if options.suite == CompilerSuite::Gnu {
        let intmath = root.join("ungrib/src/ngl/g2/intmath.f");
        for patch in intmath_patches()? {
            configure_patches.push((intmath.clone(), patch));
        }
    }
    Ok(BuildPlan {
        tool: Tool::Wps,
        root: root.to_path_buf(),
        configure_args: vec![],
        script: InteractionScript::new().expect(SELECTION_PROMPT, wps_selection(options.suite))?,
        source_patches: vec![],
        configure_patches,
        compile_target: None,
        expected: expected(
            root,
            &[
                "geogrid/src/geogrid.exe",
                "metgrid/src/metgrid.exe",
                "ungrib/src/ungrib.exe",
            ],
        ),
    })
}

/// Before 4.0 WRFPLUS was a patched WRF tree producing `main/wrf.exe`.
pub fn wrfplus_plan(
    root: &Path,
    version: Version,
    options: &BuildOptions,
) -> Result<BuildPlan, WrfError> {
    let mut source_patches = vec![];
    if Version::new(3, 6, 1) <= version && version <= Version::new(3, 8, 1) {
        source_patches.push((root.join("phys/module_cu_g3.F"), seed_patch()?));
    }
    if options.use_grib {
        source_patches.push((root.join("arch/Config.pl"), grib2_patch()?));
    }
    let mut configure_patches = configure_wrf_patches(root, options)?;
    if options.suite == CompilerSuite::Intel {
        configure_patches.push((
            root.join("configure.wrf"),
            PatchSet::new().add_literal("override-limits", "qoverride-limits")?,
        ));
    }
    let (target, exe) = if version >= Version::new(4, 0, 0) {
        ("wrfplus", "main/wrfplus.exe")
    } else {
        ("wrf", "main/wrf.exe")
    };
    Ok(BuildPlan {
        tool: Tool::Wrfplus,
        root: root.to_path_buf(),
        configure_args: vec!["wrfplus".to_string()],
        script: InteractionScript::new()
            .expect(SELECTION_PROMPT, wrfplus_selection(options.suite, version))?,
        source_patches,
        configure_patches,
        compile_target: Some(target.to_string()),
        expected: expected(root, &[exe]),
    })
}

pub fn wrfda_plan(root: &Path, options: &BuildOptions) -> Result<BuildPlan, WrfError> {
    let mut source_patches = vec![];
    if options.use_grib {
        source_patches.push((root.join("arch/Config.pl"), grib2_patch()?));
    }
    Ok(BuildPlan {
        tool: Tool::Wrfda,
        root: root.to_path_buf(),
        configure_args: vec!["4dvar".to_string()],
        script: InteractionScript::new().expect(SELECTION_PROMPT, wrfda_selection(options.suite))?,
        source_patches,
        configure_patches: configure_wrf_patches(root, options)?,
        compile_target: Some("all_wrfvar".to_string()),
        expected: expected(root, &WRFDA_EXECUTABLES),
    })
}

fn which(program: &str) -> Option<PathBuf> {
    let output = Command::new("which").arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Prefix of an installation, two levels above one of its programs.
fn install_prefix(program: &Path) -> Option<PathBuf> {
    program.parent()?.parent().map(Path::to_path_buf)
}

/// Environment variables the build systems look for, completed from the
/// programs found on `PATH`.
pub fn discover_build_env(settings: &Settings, need_jasper: bool) -> Result<BTreeMap<String, String>, WrfError> {
    let mut env = BTreeMap::new();
    for (var, program) in [("HDF5", "h5dump"), ("NETCDF", "ncdump")] {
        if settings.env(var).is_some() {
            continue;
        }
        match which(program).as_deref().and_then(install_prefix) {
            Some(prefix) => {
                info!("Set {var} to {}", prefix.display());
                env.insert(var.to_string(), prefix.display().to_string());
            }
            None => warn!("{var} environment variable is not set!"),
        }
    }

    if settings.env("JASPERINC").is_none() || settings.env("JASPERLIB").is_none() {
        match settings.env("JASPER_ROOT") {
            Some(jasper) => {
                env.insert("JASPERINC".to_string(), format!("{jasper}/include"));
                env.insert("JASPERLIB".to_string(), format!("{jasper}/lib"));
                info!("Set JASPERINC and JASPERLIB from {jasper}.");
            }
            None if need_jasper => {
                return Err(WrfError::environment(
                    "JASPERINC and JASPERLIB environment variables are not set!",
                ))
            }
            None => {}
        }
    }
    if settings.env("WRFIO_NCD_LARGE_FILE_SUPPORT").is_none() {
        env.insert("WRFIO_NCD_LARGE_FILE_SUPPORT".to_string(), "1".to_string());
    }
    Ok(env)
}

fn run_quiet(root: &Path, env: &BTreeMap<String, String>, program: &str, args: &[&str]) -> Result<(), WrfError> {
    info!("==> ./{program} {}", args.join(" "));
    Command::new(root.join(program))
        .args(args)
        .current_dir(root)
        .envs(env)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| WrfError::environment(format!("Failed to run {program}: {err}")))?;
    Ok(())
}

fn configure(plan: &BuildPlan, env: &BTreeMap<String, String>) -> Result<(), WrfError> {
    info!("Configure {} ...", plan.tool);
    info!("==> ./configure {}", plan.configure_args.join(" "));
    let mut child = Command::new(plan.root.join("configure"))
        .args(&plan.configure_args)
        .current_dir(&plan.root)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| {
            WrfError::environment(format!("Failed to run {}/configure: {err}", plan.root.display()))
        })?;
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(WrfError::environment("configure has no terminal streams!"));
    };
    let transcript = plan.script.drive(stdout, stdin);
    child.wait()?;
    let transcript = transcript?;
    File::create(plan.root.join("configure.out"))?.write_all(transcript.as_bytes())?;
    Ok(())
}

fn compile(plan: &BuildPlan, env: &BTreeMap<String, String>, verbose: bool) -> Result<(), WrfError> {
    info!("Compile {} ...", plan.tool);
    let mut command = Command::new(plan.root.join("compile"));
    command.current_dir(&plan.root).envs(env);
    if let Some(target) = &plan.compile_target {
        command.arg(target);
    }
    if !verbose {
        let log = File::create(plan.compile_log())?;
        command
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
    }
    info!(
        "==> ./compile {}",
        plan.compile_target.as_deref().unwrap_or_default()
    );
    command.status().map_err(|err| {
        WrfError::environment(format!("Failed to run {}/compile: {err}", plan.root.display()))
    })?;
    Ok(())
}

/// Configure and compile one tool. A tool whose executables are all
/// present is left alone unless `force` is set, which cleans the tree
/// first.
pub fn build_tool(
    plan: &BuildPlan,
    env: &BTreeMap<String, String>,
    options: &BuildOptions,
) -> Result<StepOutcome, WrfError> {
    let step = Step::new(&format!("{} build", plan.tool), plan.compile_log()).expect_files(&plan.expected);
    if !options.force && check_files(&plan.expected) {
        info!("{} is already built.", plan.tool);
        return Ok(StepOutcome::AlreadyComplete);
    }
    run_step(&step, options.force, || {
        if options.force {
            run_quiet(&plan.root, env, "clean", &["-a"])?;
        }
        for (path, patch) in &plan.source_patches {
            patch.apply_file(path)?;
        }
        configure(plan, env)?;
        for (path, patch) in &plan.configure_patches {
            patch.apply_file(path)?;
        }
        compile(plan, env, options.verbose)
    })
}

/// Build WRF, WPS, WRFPLUS and WRFDA in dependency order.
pub fn build_all(settings: &Settings, options: &BuildOptions) -> Result<(), WrfError> {
    let wrf_root = settings.root(Tool::Wrf.root())?;
    let wps_root = settings.root(Tool::Wps.root())?;
    let wrfplus_root = settings.root(Tool::Wrfplus.root())?;
    let wrfda_root = settings.root(Tool::Wrfda.root())?;

    let mut env = discover_build_env(settings, true)?;
    let version = tool_version(&wrf_root)?;
    if version <= Version::new(3, 6, 1) {
        env.insert("BUFR".to_string(), "1".to_string());
    }

    build_tool(&wrf_plan(&wrf_root, version, options)?, &env, options)?;
    build_tool(&wps_plan(&wps_root, &wrf_root, options)?, &env, options)?;
    build_tool(&wrfplus_plan(&wrfplus_root, version, options)?, &env, options)?;

    env.insert("WRFPLUS_DIR".to_string(), wrfplus_root.display().to_string());
    build_tool(&wrfda_plan(&wrfda_root, options)?, &env, options)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn selections_follow_suite_and_version() {
        assert_eq!(wps_selection(CompilerSuite::Gnu), "3");
        assert_eq!(wrfda_selection(CompilerSuite::Pgi), "28");
        assert_eq!(
            wrfplus_selection(CompilerSuite::Intel, Version::new(3, 6, 1)),
            "8"
        );
        assert_eq!(
            wrfplus_selection(CompilerSuite::Intel, Version::new(3, 9, 1)),
            "34"
        );
        if !cfg!(target_os = "macos") {
            assert_eq!(wrf_selection(CompilerSuite::Gnu, false), "34");
            assert_eq!(wrf_selection(CompilerSuite::Pgi, true), "55");
        }
    }

    #[test]
    fn intmath_variants_are_patched_once_each() {
        let mut text = "      if (iand(i,i-1)/=0) then\n".repeat(4);
        for patch in intmath_patches().unwrap() {
            text = patch.apply_text(&text).0;
        }
        assert_eq!(
            text,
            "      if (iand(i,i-1_8)/=0) then\n\
             \x20     if (iand(i,i-1_4)/=0) then\n\
             \x20     if (iand(i,i-1_2)/=0) then\n\
             \x20     if (iand(i,i-1_1)/=0) then\n"
        );
    }

    #[test]
    fn dm_cc_gets_mpi2_flag() {
        let (text, matched) = dm_cc_patch()
            .unwrap()
            .apply_text("DM_FC = mpif90\nDM_CC           =       mpicc\n");
        assert_eq!(matched, 1);
        assert_eq!(text, "DM_FC = mpif90\nDM_CC = mpicc -DMPI2_SUPPORT\n");
    }

    #[test]
    fn jasper_is_required_for_wps() {
        let settings = Settings::new(HashMap::from([
            ("HDF5".to_string(), "/opt/hdf5".to_string()),
            ("NETCDF".to_string(), "/opt/netcdf".to_string()),
        ]));
        let err = discover_build_env(&settings, true).unwrap_err();
        assert!(err.message().contains("JASPERINC"));

        let settings = Settings::new(HashMap::from([
            ("HDF5".to_string(), "/opt/hdf5".to_string()),
            ("NETCDF".to_string(), "/opt/netcdf".to_string()),
            ("JASPER_ROOT".to_string(), "/opt/jasper".to_string()),
        ]));
        let env = discover_build_env(&settings, true).unwrap();
        assert_eq!(env["JASPERLIB"], "/opt/jasper/lib");
        assert_eq!(env["WRFIO_NCD_LARGE_FILE_SUPPORT"], "1");
        assert!(!env.contains_key("NETCDF"));
    }

    fn script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn builds_with_scripted_configure() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        script(
            &root.join("configure"),
            "printf 'Enter selection [1-40] : '\nread choice\n\
             echo \"DM_CC = mpicc\" > configure.wps\n\
             echo \"WRF_DIR = ../WRFV3\" >> configure.wps\n\
             echo \"selected $choice\"\n",
        );
        script(
            &root.join("compile"),
            "mkdir -p geogrid/src metgrid/src ungrib/src\n\
             for exe in geogrid metgrid ungrib; do echo exe > $exe/src/$exe.exe; done\n",
        );
        let options = BuildOptions::new(CompilerSuite::Intel);
        let plan = wps_plan(root, Path::new("/opt/WRF"), &options).unwrap();
        let env = BTreeMap::new();

        assert_eq!(build_tool(&plan, &env, &options).unwrap(), StepOutcome::Completed);
        let configure_wps = fs::read_to_string(root.join("configure.wps")).unwrap();
        assert!(configure_wps.contains("DM_CC = mpiicc\n"));
        assert!(configure_wps.contains("WRF_DIR = /opt/WRF\n"));
        assert!(fs::read_to_string(root.join("configure.out"))
            .unwrap()
            .contains("selected 19"));

        assert_eq!(
            build_tool(&plan, &env, &options).unwrap(),
            StepOutcome::AlreadyComplete
        );
    }
}
