use serde::{Deserialize, Serialize};

/// Immutable participant descriptor.
///
/// The `id` is assigned by the transport when the relay connection opens and
/// never changes for the lifetime of the session; `name` is the display name
/// chosen by the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
