/// Event types emitted by the file watcher.
use serde::{Deserialize, Serialize};

/// SHA-256 fingerprint of document content, used for self-write detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(pub String);

impl ContentFingerprint {
    /// Fingerprint with line endings normalized to `\n`.
    pub fn from_content(content: &str) -> Self {
        use sha2::{Digest, Sha256};
        let normalized = content.replace("\r\n", "\n");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}

/// External changes to card documents, keyed by document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CardChangeEvent {
    Changed { id: String },
    Created { id: String },
    Deleted { id: String },
}

impl CardChangeEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Changed { id } | Self::Created { id } | Self::Deleted { id } => id,
        }
    }
}
