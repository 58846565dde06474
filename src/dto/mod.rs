//! Wire DTOs and the pane content tree parser (spec.md §3 SUPPLEMENT, §6).

pub mod pane_tree;
pub mod wire;

pub use wire::{
    EventBatch, EventInput, RenderPaneRequest, RenderPaneResponse, SseEventPayload,
    StateUpdateRequest, StateUpdateResponse, UnsetCascade,
};
