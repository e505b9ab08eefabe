//! OS process plumbing for provider instances.

mod shutdown;
mod spawn;
mod stream;

pub use shutdown::shutdown_child;
pub use spawn::{SpawnedProvider, spawn_provider};
pub use stream::{LineHandler, StreamKind, spawn_stream_reader};
