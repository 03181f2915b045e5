use std::fmt;
use std::io;
use std::path::PathBuf;

/// Error taxonomy for the controller.
///
/// There is deliberately no variant for "invalid statistic" (empty
/// population, confidence interval requested with too few samples): that
/// case is not an error, it is carried as an explicit `bool`/`Option`
/// return from the statistics kernel and handled by the caller (see
/// `stats::student_t` and `stats::Population`).
#[derive(Debug)]
pub enum Error {
    /// Could not open, read, or write one of the three files the control
    /// loop depends on (`save_file`, `file_in`, `file_out`).
    Io { path: Option<PathBuf>, inner: io::Error },
    /// A run record in a save file was short, malformed, or named a
    /// metric longer than `MAX_METRIC_NAME`.
    Corrupt { reason: String },
    /// The textual configuration file contained an unknown directive, a
    /// missing required argument, or an `s`/`d` descriptor without `out`
    /// or `check`.
    Config { line: usize, reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { path: Some(path), inner } => {
                write!(f, "I/O error on {:?}: {}", path, inner)
            }
            Error::Io { path: None, inner } => write!(f, "I/O error: {}", inner),
            Error::Corrupt { reason } => write!(f, "corrupt save-file record: {}", reason),
            Error::Config { line, reason } => {
                write!(f, "configuration error at line {}: {}", line, reason)
            }
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { inner, .. } => Some(inner),
            Error::Corrupt { .. } | Error::Config { .. } => None,
        }
    }
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, inner: io::Error) -> Error {
        Error::Io { path: Some(path.into()), inner }
    }

    pub fn corrupt(reason: impl Into<String>) -> Error {
        Error::Corrupt { reason: reason.into() }
    }

    pub fn config(line: usize, reason: impl Into<String>) -> Error {
        Error::Config { line, reason: reason.into() }
    }
}

impl From<io::Error> for Error {
    fn from(inner: io::Error) -> Error {
        Error::Io { path: None, inner }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Logs a fatal error with the identity of the component that raised it,
/// then returns it unchanged. The control loop calls this immediately
/// before propagating a fatal error out of `run`; it does not write a
/// STOP token on this path, so the simulator observes connection closure
/// rather than a clean stop (see `control::ControlLoop::run`).
pub(crate) fn log_fatal(component: &str, e: Error) -> Error {
    log::error!("{component}: {e}");
    e
}
