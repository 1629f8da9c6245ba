use std::path::PathBuf;

use objrt_core::LoaderError;
use objrt_core::elf::ElfError;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Elf {
        path: PathBuf,
        #[source]
        source: ElfError,
    },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("cannot encode report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot install logger: {0}")]
    Logger(#[from] log::SetLoggerError),
}
