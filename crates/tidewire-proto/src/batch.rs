use crate::edit::RenderTreeEdit;
use crate::frame::ReferenceFrame;

pub type ComponentId = u32;
pub type EventHandlerId = u64;

/// Edits for one component, replayed against that component's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTreeDiff {
    pub component_id: ComponentId,
    pub edits: Vec<RenderTreeEdit>,
}

impl RenderTreeDiff {
    pub fn new(component_id: ComponentId, edits: Vec<RenderTreeEdit>) -> Self {
        Self {
            component_id,
            edits,
        }
    }
}

/// The unit of transmission produced by one render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderBatch {
    pub updated_components: Vec<RenderTreeDiff>,
    pub reference_frames: Vec<ReferenceFrame>,
    pub disposed_component_ids: Vec<ComponentId>,
    pub disposed_event_handler_ids: Vec<EventHandlerId>,
}

impl RenderBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame to the table and returns its index.
    pub fn push_frame(&mut self, frame: ReferenceFrame) -> u32 {
        let index = self.reference_frames.len() as u32;
        self.reference_frames.push(frame);
        index
    }

    pub fn push_diff(&mut self, component_id: ComponentId, edits: Vec<RenderTreeEdit>) {
        self.updated_components
            .push(RenderTreeDiff::new(component_id, edits));
    }

    pub fn dispose_component(&mut self, component_id: ComponentId) {
        self.disposed_component_ids.push(component_id);
    }

    pub fn dispose_event_handler(&mut self, handler_id: EventHandlerId) {
        self.disposed_event_handler_ids.push(handler_id);
    }

    pub fn is_empty(&self) -> bool {
        self.updated_components.is_empty()
            && self.disposed_component_ids.is_empty()
            && self.disposed_event_handler_ids.is_empty()
    }

    pub fn edit_count(&self) -> usize {
        self.updated_components
            .iter()
            .map(|diff| diff.edits.len())
            .sum()
    }
}
