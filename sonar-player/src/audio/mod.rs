//! Audio collaborators: decoded buffers, decoding, fetching and output

pub mod backend;
pub mod decoder;
pub mod fetch;
pub mod types;
pub mod virtual_backend;

pub use backend::{EndedCallback, LoopRegion, MixBus, OutputBackend, PlaybackSource, SourceRequest};
pub use decoder::{AudioDecoder, SymphoniaDecoder};
pub use fetch::{Fetcher, HttpFetcher};
pub use types::SampleBuffer;
pub use virtual_backend::{SourceInfo, VirtualBackend};
