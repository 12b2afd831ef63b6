pub mod reconciler;
pub mod ws;

pub use reconciler::{ConnectionPhase, Identity, Reconciler};
pub use ws::{run, ClientEvent, RECONNECT_DELAY};
