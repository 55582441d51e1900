use std::{fs, path::Path};

use chrono::Utc;
use log::{debug, info, warn};

use crate::helpers::{search_files, WrfError};

use super::models::{Step, StepOutcome};

/// Run one external step with its completion checks.
///
/// The step is skipped when its outputs are already present, unless `force`
/// is set, in which case the old outputs are deleted first. After `invoke`
/// returns, the outputs are checked again and their absence is a
/// `StepFailed` error naming the step's log file.
pub fn run_step<F>(step: &Step, force: bool, invoke: F) -> Result<StepOutcome, WrfError>
where
    F: FnOnce() -> Result<(), WrfError>,
{
    if !force && step.is_complete() {
        info!("{} is already done.", step.name);
        return Ok(StepOutcome::AlreadyComplete);
    }
    if force {
        for output in &step.expected {
            if fs::symlink_metadata(&output.path).is_ok() {
                debug!("==> rm -f {}", output.path.display());
                fs::remove_file(&output.path)?;
            }
        }
    }

    info!("Run {}.", step.name);
    let start_time = Utc::now();
    invoke()?;

    if !step.is_complete() {
        for missing in step.missing() {
            debug!("Missing output {}", missing.display());
        }
        return Err(WrfError::step_failed(format!(
            "Failed! See {}.",
            step.log_path.display()
        )));
    }
    let elapsed_time = Utc::now() - start_time;
    info!(
        "{} done. Elapsed time: {} seconds",
        step.name,
        elapsed_time.num_seconds()
    );
    Ok(StepOutcome::Completed)
}

/// Invoke with `ntasks`; when the outputs are missing and a `rsl.error.*`
/// file in `log_dir` contains `diagnostic`, invoke once more with a single
/// task.
pub fn invoke_with_retry<F>(
    step: &Step,
    ntasks: usize,
    log_dir: &Path,
    diagnostic: &str,
    mut invoke: F,
) -> Result<(), WrfError>
where
    F: FnMut(usize) -> Result<(), WrfError>,
{
    invoke(ntasks)?;
    if ntasks > 1 && !step.is_complete() && search_files(log_dir, "rsl.error.", diagnostic) {
        warn!("Failed to run {} with {ntasks} processes, retry with 1.", step.name);
        invoke(1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::ErrorKind;
    use crate::runner::models::ExpectedOutput;
    use std::cell::Cell;

    #[test]
    fn second_run_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("geo_em.d01.nc");
        let step = Step::new("geogrid", dir.path().join("geogrid.log.0000"))
            .expect(ExpectedOutput::file(&out));
        let calls = Cell::new(0);
        let invoke = || -> Result<(), WrfError> {
            calls.set(calls.get() + 1);
            fs::write(&out, "nc")?;
            Ok(())
        };

        assert_eq!(run_step(&step, false, invoke).unwrap(), StepOutcome::Completed);
        assert_eq!(
            run_step(&step, false, invoke).unwrap(),
            StepOutcome::AlreadyComplete
        );
        assert_eq!(calls.get(), 1);

        assert_eq!(run_step(&step, true, invoke).unwrap(), StepOutcome::Completed);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn force_deletes_old_outputs() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("wrfout_d01_2019-06-01_06:00:00");
        fs::write(&out, "old").unwrap();
        let step = Step::new("wrf", dir.path().join("rsl.error.0000")).expect_files(&[&out]);
        let seen_before_run = Cell::new(true);
        let err = run_step(&step, true, || {
            seen_before_run.set(out.exists());
            Ok(())
        })
        .unwrap_err();
        assert!(!seen_before_run.get());
        assert_eq!(err.kind(), ErrorKind::StepFailed);
        assert!(err.message().contains("rsl.error.0000"));
    }

    #[test]
    fn retries_once_on_diagnostic() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("wrfvar_output");
        let step = Step::new("3dvar", dir.path().join("rsl.error.0000")).expect_files(&[&out]);
        let mut tasks = vec![];
        invoke_with_retry(&step, 4, dir.path(), "Invalid CV option", |np| {
            tasks.push(np);
            if np == 1 {
                fs::write(&out, "analysis")?;
            } else {
                fs::write(dir.path().join("rsl.error.0001"), "Invalid CV option chosen")?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(tasks, vec![4, 1]);
    }

    #[test]
    fn no_retry_without_diagnostic() {
        let dir = tempfile::TempDir::new().unwrap();
        let step = Step::new("3dvar", dir.path().join("rsl.error.0000"))
            .expect_files(&[dir.path().join("wrfvar_output")]);
        let mut tasks = vec![];
        invoke_with_retry(&step, 4, dir.path(), "Invalid CV option", |np| {
            tasks.push(np);
            Ok(())
        })
        .unwrap();
        assert_eq!(tasks, vec![4]);
    }
}
