//! PinCanvas Core Library
//!
//! Canvas, layer and pin data model for PinCanvas, kept consistent across
//! in-memory state, a client-side cache and the authoritative remote store.

pub mod canvas;
pub mod config;
pub mod error;
pub mod layer;
pub mod mapper;
pub mod model;
pub mod pin;
pub mod policy;
pub mod remote;
pub mod session;
pub mod sharing;
pub mod state;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use canvas::{CanvasStore, CanvasSummary};
pub use config::{SessionConfig, SyncConfig};
pub use error::{CanvasError, CanvasResult};
pub use layer::LayerStore;
pub use mapper::{CoordinateMapper, contain_rect};
pub use model::{
    Canvas, CanvasId, Layer, LayerColor, LayerId, MediaItem, MediaKind, NewMedia, Pin, PinId,
    PinPatch, PinRecord, Profile, Row, RowKey, Share, SharePermission, ShareId, UserId,
};
pub use pin::PinStore;
pub use policy::{Permission, SharingPolicy};
pub use remote::{MemoryRemote, RemoteError, RemoteStore};
pub use session::{Hydration, Session, StoreEvent};
pub use sharing::{ShareEntry, ShareStore};
pub use state::ModelState;
pub use sync::{MutationRecord, MutationState, SyncEngine};
