//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup, the run itself and
//! the result export, so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: macrosim_core::ConfigError,
    },

    /// Building or running the Circuit failed.
    #[error("circuit error: {source}")]
    Circuit {
        /// The underlying Circuit error.
        #[from]
        source: macrosim_core::CircuitError,
    },

    /// The blocking run task panicked or was cancelled.
    #[error("run task failed: {source}")]
    Join {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// Serializing the exported series failed.
    #[error("export encoding failed: {source}")]
    Encode {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Writing the exported series failed.
    #[error("export write to {path} failed: {source}")]
    Export {
        /// Destination file.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
