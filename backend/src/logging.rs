use std::fs::OpenOptions;
use std::path::PathBuf;

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "stdout" => LogTarget::Stdout,
            "stderr" => LogTarget::Stderr,
            path => LogTarget::File(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub filter: String,
    pub target: LogTarget,
}

impl LoggingConfig {
    pub fn new(filter: String, target: &str) -> Self {
        Self {
            filter,
            target: LogTarget::parse(target),
        }
    }
}

/// Installs the process logger. Called once from `main`.
pub fn init(config: &LoggingConfig) -> std::io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.filter);

    match &config.target {
        LogTarget::Stdout => {
            builder.target(env_logger::Target::Stdout);
        }
        LogTarget::Stderr => {
            builder.target(env_logger::Target::Stderr);
        }
        LogTarget::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
    }

    builder
        .try_init()
        .map_err(std::io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!(LogTarget::parse("stdout"), LogTarget::Stdout);
        assert_eq!(LogTarget::parse(""), LogTarget::Stdout);
        assert_eq!(LogTarget::parse("stderr"), LogTarget::Stderr);
        assert_eq!(
            LogTarget::parse("/var/log/inference.log"),
            LogTarget::File(PathBuf::from("/var/log/inference.log"))
        );
    }

    // The only test in this binary that installs the process logger.
    #[test]
    fn second_install_is_reported_as_io_error() {
        let path = std::env::temp_dir()
            .join(format!("inference-log-{}", std::process::id()))
            .join("service.log");
        let config = LoggingConfig::new("info".to_string(), path.to_str().unwrap());

        init(&config).unwrap();
        log::info!("logger installed");
        assert!(path.exists());

        let err = init(&config).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
