//! Panel domain module.
//!
//! A panel is one open unit of work in the carousel: a clip, song, playlist or
//! read-only reference, addressed by a `<kind>:<item id>` identifier.

mod model;

pub use model::{
    ClipPayload, ItemKind, Panel, PanelId, PanelPayload, PlaylistPayload, ReferencePayload,
    SongPayload,
};
