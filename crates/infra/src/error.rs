//! Errors raised while wiring the engine together.
//!
//! Once running, nothing in the engine returns an error to producers; these
//! only cover construction.

use notifyhub_events::HistoryError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
