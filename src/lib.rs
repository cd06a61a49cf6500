// src/lib.rs
pub mod pacer {
    pub use crate::deliver::{DeliveryOutcome, DeliveryReport};
    pub use crate::index::{Index, IndexSummary};
    pub use crate::types::{DeliveryConfig, IndexOptions, PlayOptions, ProbeReport, RelayOptions, ServeOptions};

    /// Async entry-point for playback; returns when every session has ended
    /// or `stop` turned true.
    pub async fn play(
        opts: PlayOptions,
        stop: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<Vec<DeliveryReport>> {
        crate::core::play(opts, stop).await
    }

    pub async fn relay(
        opts: RelayOptions,
        stop: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<crate::relay::RelayStats> {
        crate::core::relay(opts, stop).await
    }

    pub async fn serve(opts: ServeOptions) -> anyhow::Result<()> {
        crate::core::serve(opts).await
    }

    pub fn index(opts: &IndexOptions) -> anyhow::Result<IndexSummary> {
        crate::core::index(opts)
    }

    pub fn probe(opts: &IndexOptions) -> anyhow::Result<ProbeReport> {
        crate::core::probe(opts)
    }
}

pub mod clock;
pub mod constants;
pub mod control;
pub mod core;
pub mod deliver;
pub mod error;
pub mod index;
pub mod network;
pub mod packet;
pub mod pes;
pub mod processor;
pub mod psi;
pub mod relay;
pub mod report;
pub mod stats;
pub mod types;

pub use error::{PacerError, Result};
