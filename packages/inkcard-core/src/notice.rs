/// Transient user-facing notices raised by the autosave engine.
use std::fmt;

use crate::types::MAX_IMAGES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SaveFailed { id: String },
    ColorFailed { id: String },
    PinFailed { id: String },
    /// Another card already holds the pin.
    PinConflict { id: String, pinned: String },
    FloatingFailed { id: String },
    DeleteFailed { id: String },
    CreateFailed,
    ImageDuplicate { id: String, path: String },
    ImageLimit { id: String },
}

impl Notice {
    /// Card the notice is about, if any.
    pub fn card_id(&self) -> Option<&str> {
        match self {
            Self::SaveFailed { id }
            | Self::ColorFailed { id }
            | Self::PinFailed { id }
            | Self::PinConflict { id, .. }
            | Self::FloatingFailed { id }
            | Self::DeleteFailed { id }
            | Self::ImageDuplicate { id, .. }
            | Self::ImageLimit { id } => Some(id),
            Self::CreateFailed => None,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SaveFailed { .. } => f.write_str("Save failed. Your text is kept, edit again to retry."),
            Self::ColorFailed { .. } => f.write_str("Could not change the card color."),
            Self::PinFailed { .. } => f.write_str("Could not update the pin."),
            Self::PinConflict { .. } => f.write_str("Another card is already pinned. Unpin it first."),
            Self::FloatingFailed { .. } => f.write_str("Could not update the floating panel."),
            Self::DeleteFailed { .. } => f.write_str("Could not delete the card."),
            Self::CreateFailed => f.write_str("Could not create a new card."),
            Self::ImageDuplicate { .. } => f.write_str("This image is already attached."),
            Self::ImageLimit { .. } => write!(f, "A card can hold at most {} images.", MAX_IMAGES),
        }
    }
}

/// Sink for notices. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Writes every notice to the log at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.card_id() {
            Some(id) => log::warn!("[inkcard.notice] {} ({})", notice, id),
            None => log::warn!("[inkcard.notice] {}", notice),
        }
    }
}
