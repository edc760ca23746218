//! Destination sinks a [`super::Dispatcher`] can emit to

pub mod stdout;

use async_trait::async_trait;

use crate::core::errors::CdcResult;

pub use stdout::StdoutSink;

/// Common trait every dispatch destination implements, following the
/// teacher's own `EventSink` shape.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn dispatch(&self, item: super::DispatchItem) -> CdcResult<()>;
}
