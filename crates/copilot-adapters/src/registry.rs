//! Builds the concrete `UpstreamAdapter` for a given `UpstreamConfig`.

use copilot_core::{UpstreamConfig, UpstreamKind};
use std::sync::Arc;

use crate::adapter::UpstreamAdapter;
use crate::arr::ArrAdapter;
use crate::download::DownloadAdapter;
use crate::library::MediaLibraryAdapter;

pub fn build_adapter(config: &UpstreamConfig) -> Arc<dyn UpstreamAdapter> {
    match config.kind {
        UpstreamKind::Download => Arc::new(DownloadAdapter::new(config)),
        UpstreamKind::TvManager => Arc::new(ArrAdapter::new(UpstreamKind::TvManager, config)),
        UpstreamKind::MovieManager => Arc::new(ArrAdapter::new(UpstreamKind::MovieManager, config)),
        UpstreamKind::MediaLibrary => Arc::new(MediaLibraryAdapter::new(config)),
    }
}
