/// time format used by WRF in file names and namelists
pub const WRF_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";
/// cycle directory name format
pub const CYCLE_DIR_FORMAT: &str = "%Y%m%d%H";
/// LITTLE_R observation file suffix
pub const LITTLER_TIME_FORMAT: &str = "%Y%m%d%H%M";

/// seconds between two polls of a running job
pub const POLL_INTERVAL_SECONDS: u64 = 10;

/// hours between two warm start cycles
pub const CYCLE_HOURS: i64 = 3;

/// observation time window around the analysis time, minutes
pub const DEFAULT_TIME_WINDOW_MINUTES: i64 = 360;

/// default MPI task count for the run executables
pub const DEFAULT_NUM_PROC: usize = 2;

/// diagnostic emitted by da_wrfvar.exe when the process count is not
/// compatible with the chosen background error option
pub const INVALID_CV_DIAGNOSTIC: &str = "Invalid CV option chosen:  cv_options =    0";

/// gravity acceleration, m s-2
pub const GRAVITY: f64 = 9.8;
/// temperature weight of the FSO energy norm is (GRAVITY / 3)^2
pub const FSO_TEMPERATURE_SCALE: f64 = (GRAVITY / 3.0) * (GRAVITY / 3.0);
/// pressure weight of the FSO energy norm is (1 / 300)^2
pub const FSO_PRESSURE_SCALE: f64 = (1.0 / 300.0) * (1.0 / 300.0);

/// hours of the day at which background cycles are searched, latest first
pub const BACKGROUND_CYCLE_HOURS: [u32; 4] = [18, 12, 6, 0];

/// variables holding the forecast error and its adjoint sensitivity
pub const SENSITIVITY_VARIABLES: [&str; 4] = ["A_U", "A_V", "A_T", "A_P"];
