//! Console logging.
//!
//! The library only emits records through the [`log`] facade; [`init`]
//! installs an `env_logger` backend with a colored level column. `RUST_LOG`
//! takes precedence over the level chosen here.
//!
//! FFmpeg prints to stderr through its own channel. The MJPEG and MPEG-4
//! encoders warn often enough to clutter a conversion run, so its level is
//! set separately with [`set_ffmpeg_log_level`].
//!
//! ```no_run
//! use bagframes::FfmpegLogLevel;
//!
//! bagframes::logging::init(false);
//! bagframes::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! ```

use std::io::Write;
use std::str::FromStr;

use colored::Colorize;
use ffmpeg_next::util::log::Level as AvLevel;
use log::{Level, LevelFilter};

use crate::error::BagFramesError;

/// Level used when `verbose` is requested or not.
pub fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Install the console logger.
///
/// Does nothing if a logger is already installed.
pub fn init(verbose: bool) {
    let level = default_level(verbose);
    let env = env_logger::Env::default().default_filter_or(level.as_str());

    let installed = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let label = match record.level() {
                Level::Error => "ERROR".bright_red(),
                Level::Warn => "WARN ".yellow(),
                Level::Info => "INFO ".green(),
                Level::Debug => "DEBUG".blue(),
                Level::Trace => "TRACE".magenta(),
            };
            writeln!(
                buf,
                "{} {} {}",
                buf.timestamp().to_string().white(),
                label,
                record.args()
            )
        })
        .try_init();

    if installed.is_ok() {
        log::debug!("Logger initialized with level: {level}");
    }
}

/// How much FFmpeg itself prints to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Nothing.
    Quiet,
    /// Errors only.
    Error,
    /// Errors and warnings (FFmpeg's own default).
    Warning,
    /// Stream and codec setup details.
    Info,
    /// Everything FFmpeg has to say.
    Debug,
}

impl FfmpegLogLevel {
    /// FFmpeg level to pair with a console log filter. Normal runs keep
    /// encoder warnings out of the way; `--verbose` lets them through.
    pub fn for_filter(filter: LevelFilter) -> Self {
        match filter {
            LevelFilter::Off => FfmpegLogLevel::Quiet,
            LevelFilter::Error | LevelFilter::Warn | LevelFilter::Info => FfmpegLogLevel::Error,
            LevelFilter::Debug => FfmpegLogLevel::Info,
            LevelFilter::Trace => FfmpegLogLevel::Debug,
        }
    }

    fn to_av_level(self) -> AvLevel {
        match self {
            FfmpegLogLevel::Quiet => AvLevel::Quiet,
            FfmpegLogLevel::Error => AvLevel::Error,
            FfmpegLogLevel::Warning => AvLevel::Warning,
            FfmpegLogLevel::Info => AvLevel::Info,
            FfmpegLogLevel::Debug => AvLevel::Debug,
        }
    }

    fn from_av_level(level: AvLevel) -> Self {
        match level {
            AvLevel::Quiet => FfmpegLogLevel::Quiet,
            AvLevel::Panic | AvLevel::Fatal | AvLevel::Error => FfmpegLogLevel::Error,
            AvLevel::Warning => FfmpegLogLevel::Warning,
            AvLevel::Info | AvLevel::Verbose => FfmpegLogLevel::Info,
            AvLevel::Debug | AvLevel::Trace => FfmpegLogLevel::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = BagFramesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            other => Err(BagFramesError::FfmpegError(format!(
                "unknown FFmpeg log level: {other}"
            ))),
        }
    }
}

/// Set how much FFmpeg prints. Does not affect `log` records.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_av_level());
}

/// Current FFmpeg level, folded onto the nearest [`FfmpegLogLevel`].
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level()
        .ok()
        .map(FfmpegLogLevel::from_av_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_level() {
        assert_eq!(default_level(false), LevelFilter::Info);
        assert_eq!(default_level(true), LevelFilter::Debug);
    }

    #[test]
    fn init_twice_is_harmless() {
        init(false);
        init(true);
    }

    #[test]
    fn ffmpeg_level_follows_console_filter() {
        assert_eq!(FfmpegLogLevel::for_filter(default_level(false)), FfmpegLogLevel::Error);
        assert_eq!(FfmpegLogLevel::for_filter(default_level(true)), FfmpegLogLevel::Info);
        assert_eq!(FfmpegLogLevel::for_filter(LevelFilter::Off), FfmpegLogLevel::Quiet);
    }

    #[test]
    fn parses_level_names() {
        assert_eq!("quiet".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Quiet);
        assert_eq!("WARN".parse::<FfmpegLogLevel>().unwrap(), FfmpegLogLevel::Warning);
        assert!("trace".parse::<FfmpegLogLevel>().is_err());
    }

    #[test]
    fn set_then_get() {
        set_ffmpeg_log_level(FfmpegLogLevel::Warning);
        assert_eq!(get_ffmpeg_log_level(), Some(FfmpegLogLevel::Warning));
        set_ffmpeg_log_level(FfmpegLogLevel::Error);
        assert_eq!(get_ffmpeg_log_level(), Some(FfmpegLogLevel::Error));
    }
}
