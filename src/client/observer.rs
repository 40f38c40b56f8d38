//! Callbacks invoked from the frame pump.

use std::sync::Arc;

use crate::snapshot::{DynamicObjects, StaticObjects};

/// Receives connection and snapshot events.
///
/// Every method runs on the pump task, in frame order, after the snapshot has been
/// published. Slow implementations stall frame ingestion.
pub trait StreamObserver: Send + Sync + 'static {
    fn on_connect(&self) {}

    /// Fired when a unicast connection ends, whether it failed or was closed.
    fn on_disconnect(&self) {}

    fn on_static_objects(&self, _objects: &Arc<StaticObjects>) {}

    fn on_dynamic_objects(&self, _objects: &Arc<DynamicObjects>) {}
}
