/// Which part of the upstream repository a sync mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SyncType {
    /// Full plugin archives.
    All,
    /// Readme files only.
    Readme,
}

impl SyncType {
    /// Argument passed to every worker invocation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::All => "all",
            SyncType::Readme => "readme",
        }
    }

    /// Directory under the mirror root holding this sync type's files.
    pub fn directory_name(&self) -> &'static str {
        match self {
            SyncType::All => "plugins",
            SyncType::Readme => "readmes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
