/// A single positional instruction replayed by the client against its shadow
/// tree. Indices are relative to the cursor's offset at the current depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTreeEdit {
    PrependFrame {
        sibling_index: u32,
        reference_frame_index: u32,
    },
    RemoveFrame {
        sibling_index: u32,
    },
    SetAttribute {
        sibling_index: u32,
        reference_frame_index: u32,
    },
    RemoveAttribute {
        sibling_index: u32,
        attribute_name: String,
    },
    UpdateText {
        sibling_index: u32,
        reference_frame_index: u32,
    },
    StepIn {
        sibling_index: u32,
    },
    StepOut,
    UpdateMarkup {
        sibling_index: u32,
        reference_frame_index: u32,
    },
    PermutationListEntry {
        sibling_index: u32,
        move_to_sibling_index: u32,
    },
    PermutationListEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    PrependFrame,
    RemoveFrame,
    SetAttribute,
    RemoveAttribute,
    UpdateText,
    StepIn,
    StepOut,
    UpdateMarkup,
    PermutationListEntry,
    PermutationListEnd,
}

impl EditKind {
    pub fn as_u8(self) -> u8 {
        match self {
            EditKind::PrependFrame => 1,
            EditKind::RemoveFrame => 2,
            EditKind::SetAttribute => 3,
            EditKind::RemoveAttribute => 4,
            EditKind::UpdateText => 5,
            EditKind::StepIn => 6,
            EditKind::StepOut => 7,
            EditKind::UpdateMarkup => 8,
            EditKind::PermutationListEntry => 9,
            EditKind::PermutationListEnd => 10,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EditKind::PrependFrame),
            2 => Some(EditKind::RemoveFrame),
            3 => Some(EditKind::SetAttribute),
            4 => Some(EditKind::RemoveAttribute),
            5 => Some(EditKind::UpdateText),
            6 => Some(EditKind::StepIn),
            7 => Some(EditKind::StepOut),
            8 => Some(EditKind::UpdateMarkup),
            9 => Some(EditKind::PermutationListEntry),
            10 => Some(EditKind::PermutationListEnd),
            _ => None,
        }
    }
}

impl RenderTreeEdit {
    pub fn kind(&self) -> EditKind {
        match self {
            RenderTreeEdit::PrependFrame { .. } => EditKind::PrependFrame,
            RenderTreeEdit::RemoveFrame { .. } => EditKind::RemoveFrame,
            RenderTreeEdit::SetAttribute { .. } => EditKind::SetAttribute,
            RenderTreeEdit::RemoveAttribute { .. } => EditKind::RemoveAttribute,
            RenderTreeEdit::UpdateText { .. } => EditKind::UpdateText,
            RenderTreeEdit::StepIn { .. } => EditKind::StepIn,
            RenderTreeEdit::StepOut => EditKind::StepOut,
            RenderTreeEdit::UpdateMarkup { .. } => EditKind::UpdateMarkup,
            RenderTreeEdit::PermutationListEntry { .. } => EditKind::PermutationListEntry,
            RenderTreeEdit::PermutationListEnd => EditKind::PermutationListEnd,
        }
    }

    pub fn prepend(sibling_index: u32, reference_frame_index: u32) -> Self {
        RenderTreeEdit::PrependFrame {
            sibling_index,
            reference_frame_index,
        }
    }

    pub fn remove(sibling_index: u32) -> Self {
        RenderTreeEdit::RemoveFrame { sibling_index }
    }

    pub fn set_attribute(sibling_index: u32, reference_frame_index: u32) -> Self {
        RenderTreeEdit::SetAttribute {
            sibling_index,
            reference_frame_index,
        }
    }

    pub fn remove_attribute(sibling_index: u32, attribute_name: impl Into<String>) -> Self {
        RenderTreeEdit::RemoveAttribute {
            sibling_index,
            attribute_name: attribute_name.into(),
        }
    }

    pub fn update_text(sibling_index: u32, reference_frame_index: u32) -> Self {
        RenderTreeEdit::UpdateText {
            sibling_index,
            reference_frame_index,
        }
    }

    pub fn update_markup(sibling_index: u32, reference_frame_index: u32) -> Self {
        RenderTreeEdit::UpdateMarkup {
            sibling_index,
            reference_frame_index,
        }
    }

    pub fn step_in(sibling_index: u32) -> Self {
        RenderTreeEdit::StepIn { sibling_index }
    }

    pub fn permute(sibling_index: u32, move_to_sibling_index: u32) -> Self {
        RenderTreeEdit::PermutationListEntry {
            sibling_index,
            move_to_sibling_index,
        }
    }
}
