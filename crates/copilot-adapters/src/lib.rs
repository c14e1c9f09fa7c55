pub mod adapter;
pub mod arr;
pub mod download;
pub mod fake;
pub mod http;
pub mod library;
pub mod registry;

pub use adapter::{ToolDescriptor, UpstreamAdapter, UpstreamVersion};
pub use arr::ArrAdapter;
pub use download::DownloadAdapter;
pub use fake::FakeAdapter;
pub use library::MediaLibraryAdapter;
pub use registry::build_adapter;
