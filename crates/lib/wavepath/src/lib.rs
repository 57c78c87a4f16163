use std::fs::File;
use std::io::{stdout, Write};
use std::str::FromStr;

pub use wavepath_common::*;
pub use wavepath_core::*;
pub use wavepath_integrator as integrator;

use log::{LevelFilter, Metadata, Record};
use parking_lot::Mutex;
use thiserror::Error;
use wavepath_common::serde::{Deserialize, Serialize};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("a logger is already installed")]
    LoggerAlreadySet(#[from] log::SetLoggerError),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to create log file `{path}`: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown log level `{0}`")]
    LogLevel(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub num_threads: usize,
    /// `"stdout"` or a file path.
    pub log_output: String,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}
impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            log_output: "stdout".into(),
            log_level: "info".into(),
        }
    }
}

enum LogOutput {
    Stdout,
    File(Mutex<File>),
}

struct SimpleLogger {
    output: LogOutput,
    level: LevelFilter,
}

impl SimpleLogger {
    fn new(config: &RuntimeConfig) -> Result<Self, InitError> {
        let level =
            LevelFilter::from_str(&config.log_level).map_err(|_| InitError::LogLevel(config.log_level.clone()))?;
        let output = match config.log_output.as_str() {
            "stdout" => LogOutput::Stdout,
            path => LogOutput::File(Mutex::new(File::create(path).map_err(|source| InitError::LogFile {
                path: path.into(),
                source,
            })?)),
        };
        Ok(Self { output, level })
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // a failed log write has nowhere to be reported
        let _ = match &self.output {
            LogOutput::Stdout => writeln!(stdout().lock(), "{} - {}", record.level(), record.args()),
            LogOutput::File(file) => writeln!(file.lock(), "{} - {}", record.level(), record.args()),
        };
    }

    fn flush(&self) {
        let _ = match &self.output {
            LogOutput::Stdout => stdout().lock().flush(),
            LogOutput::File(file) => file.lock().flush(),
        };
    }
}

/// Installs the global logger and builds the global rayon pool. Call once per process.
pub fn init(config: &RuntimeConfig) -> Result<(), InitError> {
    let logger = SimpleLogger::new(config)?;
    let level = logger.level;
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;
    log::info!("wavepath initialized with {} threads", config.num_threads);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use log::{Level, Log};

    fn temp_log(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("wavepath_{}_{}.log", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_config_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"num_threads": 3}"#).unwrap();
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.log_output, "stdout");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_logger_filters_level() {
        let path = temp_log("filter");
        let logger = SimpleLogger::new(&RuntimeConfig {
            num_threads: 1,
            log_output: path.clone(),
            log_level: "warn".into(),
        })
        .unwrap();
        assert!(logger.enabled(&Metadata::builder().level(Level::Error).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Info).build()));
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("arena exhausted"))
                .build(),
        );
        logger.log(&Record::builder().level(Level::Debug).args(format_args!("hidden")).build());
        logger.flush();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "WARN - arena exhausted\n");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_bad_log_level() {
        let config = RuntimeConfig {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(SimpleLogger::new(&config), Err(InitError::LogLevel(_))));
    }

    #[test]
    fn test_bad_log_file() {
        let config = RuntimeConfig {
            log_output: std::env::temp_dir()
                .join("wavepath_missing_dir")
                .join("nested")
                .join("log.txt")
                .to_string_lossy()
                .into_owned(),
            ..Default::default()
        };
        assert!(matches!(SimpleLogger::new(&config), Err(InitError::LogFile { .. })));
    }

    #[test]
    fn test_init_once() {
        let path = temp_log("init");
        let config = RuntimeConfig {
            num_threads: 2,
            log_output: path.clone(),
            log_level: "info".into(),
        };
        init(&config).unwrap();
        assert_eq!(rayon::current_num_threads(), 2);
        assert!(matches!(init(&config), Err(InitError::LoggerAlreadySet(_))));
        let _ = std::fs::remove_file(path);
    }
}
