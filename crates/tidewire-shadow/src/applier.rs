//! Replays render-tree edits against a [`ShadowTree`].
//!
//! Edits address children positionally through a cursor that starts at a
//! component's container. `StepIn`/`StepOut` move the cursor one level down
//! or up; sibling indices are relative to the cursor's offset at the current
//! depth (the caller's offset at depth 0, zero below it).

use std::collections::BTreeMap;

use tidewire_proto::{
    AttributeValue, ComponentId, EditKind, EventHandlerId, ReferenceFrame, RenderBatch,
    RenderTreeEdit,
};

use crate::error::ApplyError;
use crate::node::{NodeId, NodeKind};
use crate::tree::ShadowTree;

/// Applies every component diff in order, then releases disposed components
/// and event handlers.
pub fn apply_batch(tree: &mut ShadowTree, batch: &RenderBatch) -> Result<(), ApplyError> {
    for diff in &batch.updated_components {
        let container = tree
            .component_container(diff.component_id)
            .ok_or(ApplyError::UnknownComponent(diff.component_id))?;
        apply_edits(tree, container, 0, &diff.edits, &batch.reference_frames)?;
    }
    for component_id in &batch.disposed_component_ids {
        if !tree.dispose_component(*component_id) {
            tracing::debug!(
                target = "tidewire::shadow",
                component_id,
                "disposed component was not attached"
            );
        }
    }
    for handler_id in &batch.disposed_event_handler_ids {
        tree.release_event_handler(*handler_id);
    }
    Ok(())
}

/// Replays `edits` with the cursor rooted at `container`.
///
/// Each edit is validated before it mutates anything, so a failing edit
/// leaves the tree as the preceding edits left it.
pub fn apply_edits(
    tree: &mut ShadowTree,
    container: NodeId,
    child_offset: usize,
    edits: &[RenderTreeEdit],
    frames: &[ReferenceFrame],
) -> Result<(), ApplyError> {
    let mut cursor = EditCursor::new(container, child_offset);
    for edit in edits {
        let permuting = matches!(
            edit,
            RenderTreeEdit::PermutationListEntry { .. } | RenderTreeEdit::PermutationListEnd
        );
        if !permuting && !cursor.permutation.is_empty() {
            return Err(ApplyError::UnterminatedPermutation);
        }
        apply_edit(tree, &mut cursor, edit, frames)?;
    }
    if cursor.depth() != 0 {
        return Err(ApplyError::UnbalancedStepInOut);
    }
    if !cursor.permutation.is_empty() {
        tracing::warn!(
            target = "tidewire::shadow",
            entries = cursor.permutation.len(),
            "discarding permutation list without an end marker"
        );
    }
    Ok(())
}

struct EditCursor {
    parents: Vec<NodeId>,
    current: NodeId,
    base_offset: usize,
    offset: usize,
    permutation: Vec<(usize, usize)>,
}

impl EditCursor {
    fn new(container: NodeId, child_offset: usize) -> Self {
        Self {
            parents: Vec::new(),
            current: container,
            base_offset: child_offset,
            offset: child_offset,
            permutation: Vec::new(),
        }
    }

    fn depth(&self) -> usize {
        self.parents.len()
    }

    fn position(&self, sibling_index: u32) -> usize {
        self.offset + sibling_index as usize
    }

    fn step_in(&mut self, child: NodeId) {
        self.parents.push(self.current);
        self.current = child;
        self.offset = 0;
    }

    fn step_out(&mut self) -> Result<(), ApplyError> {
        let parent = self
            .parents
            .pop()
            .ok_or(ApplyError::UnbalancedStepInOut)?;
        self.current = parent;
        self.offset = if self.parents.is_empty() {
            self.base_offset
        } else {
            0
        };
        Ok(())
    }
}

fn apply_edit(
    tree: &mut ShadowTree,
    cursor: &mut EditCursor,
    edit: &RenderTreeEdit,
    frames: &[ReferenceFrame],
) -> Result<(), ApplyError> {
    let parent = cursor.current;
    match edit {
        RenderTreeEdit::PrependFrame {
            sibling_index,
            reference_frame_index,
        } => {
            let index = cursor.position(*sibling_index);
            tree.check_insert_position(parent, index)?;
            let staged = Staging::materialize(tree, frames, parent, *reference_frame_index as usize)?;
            staged.commit(tree, parent, index);
        }
        RenderTreeEdit::RemoveFrame { sibling_index } => {
            tree.remove(parent, cursor.position(*sibling_index))?;
        }
        RenderTreeEdit::SetAttribute {
            sibling_index,
            reference_frame_index,
        } => {
            let frame = frame_at(frames, *reference_frame_index as usize)?;
            let ReferenceFrame::Attribute { name, value } = frame else {
                return Err(ApplyError::UnexpectedFrame {
                    kind: frame.kind(),
                    context: "set-attribute requires an attribute frame",
                });
            };
            let target = tree.child_at(parent, cursor.position(*sibling_index))?;
            element_attributes(tree, target, EditKind::SetAttribute)?
                .insert(name.clone(), value.clone());
            if let AttributeValue::EventHandler(handler_id) = value {
                tree.register_event_handler(*handler_id);
            }
        }
        RenderTreeEdit::RemoveAttribute {
            sibling_index,
            attribute_name,
        } => {
            let target = tree.child_at(parent, cursor.position(*sibling_index))?;
            element_attributes(tree, target, EditKind::RemoveAttribute)?.remove(attribute_name);
        }
        RenderTreeEdit::UpdateText {
            sibling_index,
            reference_frame_index,
        } => {
            let frame = frame_at(frames, *reference_frame_index as usize)?;
            let ReferenceFrame::Text { content } = frame else {
                return Err(ApplyError::UnexpectedFrame {
                    kind: frame.kind(),
                    context: "update-text requires a text frame",
                });
            };
            let target = tree.child_at(parent, cursor.position(*sibling_index))?;
            match tree.kind_mut(target)? {
                NodeKind::Text { content: existing } => *existing = content.clone(),
                other => {
                    return Err(ApplyError::InvalidEditTarget {
                        edit: EditKind::UpdateText,
                        expected: "text",
                        found: other.label(),
                    })
                }
            }
        }
        RenderTreeEdit::UpdateMarkup {
            sibling_index,
            reference_frame_index,
        } => {
            let index = cursor.position(*sibling_index);
            let target = tree.child_at(parent, index)?;
            let found = tree.kind(target)?;
            if !matches!(found, NodeKind::Markup { .. }) {
                return Err(ApplyError::InvalidEditTarget {
                    edit: EditKind::UpdateMarkup,
                    expected: "markup",
                    found: found.label(),
                });
            }
            let staged = Staging::materialize(tree, frames, parent, *reference_frame_index as usize)?;
            tree.remove(parent, index)?;
            staged.commit(tree, parent, index);
        }
        RenderTreeEdit::StepIn { sibling_index } => {
            let target = tree.child_at(parent, cursor.position(*sibling_index))?;
            let found = tree.kind(target)?;
            if !found.has_children() {
                return Err(ApplyError::InvalidEditTarget {
                    edit: EditKind::StepIn,
                    expected: "container",
                    found: found.label(),
                });
            }
            cursor.step_in(target);
        }
        RenderTreeEdit::StepOut => cursor.step_out()?,
        RenderTreeEdit::PermutationListEntry {
            sibling_index,
            move_to_sibling_index,
        } => {
            let entry = (
                cursor.position(*sibling_index),
                cursor.position(*move_to_sibling_index),
            );
            cursor.permutation.push(entry);
        }
        RenderTreeEdit::PermutationListEnd => {
            tree.permute(parent, &cursor.permutation)?;
            cursor.permutation.clear();
        }
    }
    Ok(())
}

fn frame_at(frames: &[ReferenceFrame], index: usize) -> Result<&ReferenceFrame, ApplyError> {
    frames
        .get(index)
        .ok_or(ApplyError::MissingReferenceFrame(index))
}

/// Exclusive end of the frame range covered by the container at `index`.
fn subtree_end(frames: &[ReferenceFrame], index: usize) -> Result<usize, ApplyError> {
    let end = index + frames[index].subtree_length();
    if end > frames.len() {
        return Err(ApplyError::MissingReferenceFrame(frames.len()));
    }
    Ok(end)
}

fn element_attributes(
    tree: &mut ShadowTree,
    node: NodeId,
    edit: EditKind,
) -> Result<&mut BTreeMap<String, AttributeValue>, ApplyError> {
    match tree.kind_mut(node)? {
        NodeKind::Element { attributes, .. } => Ok(attributes),
        other => Err(ApplyError::InvalidEditTarget {
            edit,
            expected: "element",
            found: other.label(),
        }),
    }
}

/// Frames `next..end` still to be built under `parent`.
struct FrameRange {
    parent: NodeId,
    logical_parent: NodeId,
    next: usize,
    end: usize,
}

/// Nodes built from a frame range in a detached container, with the
/// registrations they need held back until the nodes join the tree.
struct Staging {
    root: NodeId,
    components: Vec<(ComponentId, NodeId)>,
    handlers: Vec<EventHandlerId>,
    captures: Vec<(NodeId, String)>,
}

impl Staging {
    fn materialize(
        tree: &mut ShadowTree,
        frames: &[ReferenceFrame],
        logical_parent: NodeId,
        frame_index: usize,
    ) -> Result<Self, ApplyError> {
        let root = tree.create_detached(NodeKind::Container);
        let mut staging = Staging {
            root,
            components: Vec::new(),
            handlers: Vec::new(),
            captures: Vec::new(),
        };
        match staging.insert_frames(tree, frames, root, logical_parent, frame_index) {
            Ok(()) => Ok(staging),
            Err(err) => {
                tree.free_subtree(root);
                Err(err)
            }
        }
    }

    /// Builds the frame at `index` and everything nested in it under
    /// `parent`. Nesting is tracked on an explicit stack, so depth is bounded
    /// by the frame table rather than the thread's stack.
    fn insert_frames(
        &mut self,
        tree: &mut ShadowTree,
        frames: &[ReferenceFrame],
        parent: NodeId,
        logical_parent: NodeId,
        index: usize,
    ) -> Result<(), ApplyError> {
        let mut ranges = vec![FrameRange {
            parent,
            logical_parent,
            next: index,
            end: index + 1,
        }];
        while let Some(range) = ranges.last_mut() {
            if range.next >= range.end {
                ranges.pop();
                continue;
            }
            let index = range.next;
            let (parent, logical_parent) = (range.parent, range.logical_parent);
            let frame = frame_at(frames, index)?;
            range.next = index + frame.subtree_length();

            match frame {
                ReferenceFrame::Element { name, .. } => {
                    let end = subtree_end(frames, index)?;
                    let element = tree.append_child(parent, NodeKind::element(name.clone()));
                    let mut child = index + 1;
                    while child < end {
                        let ReferenceFrame::Attribute { name, value } = &frames[child] else {
                            break;
                        };
                        if let NodeKind::Element { attributes, .. } = tree.kind_mut(element)? {
                            attributes.insert(name.clone(), value.clone());
                        }
                        if let AttributeValue::EventHandler(handler_id) = value {
                            self.handlers.push(*handler_id);
                        }
                        child += 1;
                    }
                    ranges.push(FrameRange {
                        parent: element,
                        logical_parent: element,
                        next: child,
                        end,
                    });
                }
                ReferenceFrame::Text { content } => {
                    tree.append_child(
                        parent,
                        NodeKind::Text {
                            content: content.clone(),
                        },
                    );
                }
                ReferenceFrame::Markup { content } => {
                    tree.append_child(
                        parent,
                        NodeKind::Markup {
                            content: content.clone(),
                        },
                    );
                }
                ReferenceFrame::Component { component_id, .. } => {
                    let node = tree.append_child(
                        parent,
                        NodeKind::Component {
                            component_id: *component_id,
                        },
                    );
                    self.components.push((*component_id, node));
                }
                ReferenceFrame::Region { .. } => {
                    let end = subtree_end(frames, index)?;
                    ranges.push(FrameRange {
                        parent,
                        logical_parent,
                        next: index + 1,
                        end,
                    });
                }
                ReferenceFrame::ElementReferenceCapture { capture_id } => {
                    self.captures.push((logical_parent, capture_id.clone()));
                }
                ReferenceFrame::ComponentReferenceCapture => {}
                ReferenceFrame::Attribute { .. } => {
                    return Err(ApplyError::UnexpectedFrame {
                        kind: tidewire_proto::FrameKind::Attribute,
                        context: "attribute frames may only lead an element",
                    });
                }
            }
        }
        Ok(())
    }

    fn commit(self, tree: &mut ShadowTree, parent: NodeId, index: usize) {
        tree.graft(self.root, parent, index);
        for (component_id, node) in self.components {
            tree.register_component(component_id, node);
        }
        for handler_id in self.handlers {
            tree.register_event_handler(handler_id);
        }
        for (owner, capture_id) in self.captures {
            match tree.kind_mut(owner) {
                Ok(NodeKind::Element {
                    reference_capture, ..
                }) => *reference_capture = Some(capture_id),
                _ => tracing::trace!(
                    target = "tidewire::shadow",
                    node = owner,
                    "reference capture outside an element ignored"
                ),
            }
        }
    }
}
