use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownRom,
    UnsupportedDeviceCombo,
    ManifestFetchFailure,
    SyncFailure,
    InvalidWorkTree,
    ConfigFailure,
    BuildFailure,
    ArtifactNotFound,
    Other,
}

impl ErrorKind {
    /// Short name of the step that failed, used in diagnostics.
    pub fn step(self) -> &'static str {
        match self {
            ErrorKind::UnknownRom => "rom lookup",
            ErrorKind::UnsupportedDeviceCombo => "device selection",
            ErrorKind::ManifestFetchFailure => "manifest fetch",
            ErrorKind::SyncFailure => "source sync",
            ErrorKind::InvalidWorkTree => "work tree check",
            ErrorKind::ConfigFailure => "device configuration",
            ErrorKind::BuildFailure => "build",
            ErrorKind::ArtifactNotFound => "artifact lookup",
            ErrorKind::Other => "run",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Re-tag an error raised by a lower layer with the step it failed in.
    pub fn with_kind(self, kind: ErrorKind) -> Self {
        Self { kind, ..self }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Self::msg(format!("walkdir error: {err}"))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Self::msg(format!("zip error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::msg(format!("http error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
