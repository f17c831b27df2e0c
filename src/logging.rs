use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use chrono::Local;
use env_logger::{Builder, Env, Target, WriteStyle};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::constants::{APP_LOG_PREFIX, APP_LOG_SUFFIX};
use crate::orchestrator::config::{LogConfig, LogRotation};

/// `app.log` when rotation is off, `app.<date>[-<hour>].log` otherwise.
pub fn file_appender(log_dir: &Path, cfg: &LogConfig) -> anyhow::Result<RollingFileAppender> {
    let rotation = match cfg.rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(APP_LOG_PREFIX)
        .filename_suffix(APP_LOG_SUFFIX);
    if cfg.max_files > 0 {
        builder = builder.max_log_files(cfg.max_files);
    }
    builder
        .build(log_dir)
        .with_context(|| format!("open log dir {}", log_dir.display()))
}

/// Copies every record to the log file and, when `echo` is set, to stdout.
struct Tee {
    file: RollingFileAppender,
    echo: bool,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.echo {
            let _ = io::stdout().write_all(buf);
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.echo {
            let _ = io::stdout().flush();
        }
        self.file.flush()
    }
}

/// Installs the global logger. `RUST_LOG` overrides the default `info` filter.
pub fn setup_logger(log_dir: &Path, cfg: &LogConfig, echo: bool) -> anyhow::Result<()> {
    let file = file_appender(log_dir, cfg)?;
    Builder::from_env(Env::default().default_filter_or("info"))
        .write_style(WriteStyle::Never)
        .target(Target::Pipe(Box::new(Tee { file, echo })))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {}:{} {}",
                Local::now().format("%Y/%m/%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init()
        .context("install logger")?;
    log::info!("logging to {} ({:?} rotation)", log_dir.display(), cfg.rotation);
    Ok(())
}
