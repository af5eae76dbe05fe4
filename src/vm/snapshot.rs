//! Opaque sandbox state captures.

use std::sync::Arc;

use uuid::Uuid;

/// An opaque, immutable capture of the full guest engine state.
///
/// Clones share the underlying bytes; the capture is freed when the last
/// clone is dropped. Carries the identity of the machine it was taken
/// from; a machine refuses to restore foreign captures.
#[derive(Clone)]
pub struct MachineSnapshot {
    inner: Arc<SnapshotData>,
}

struct SnapshotData {
    bytes: Box<[u8]>,
    origin: Uuid,
}

impl MachineSnapshot {
    pub(crate) fn new(bytes: Box<[u8]>, origin: Uuid) -> Self {
        Self {
            inner: Arc::new(SnapshotData { bytes, origin }),
        }
    }

    /// Identity of the sandbox this snapshot was taken from.
    pub(crate) fn origin(&self) -> Uuid {
        self.inner.origin
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Size of the captured state in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.bytes.len()
    }
}

impl std::fmt::Debug for MachineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineSnapshot")
            .field("origin", &self.inner.origin)
            .field("size_bytes", &self.inner.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_bytes() {
        let snapshot = MachineSnapshot::new(vec![1, 2, 3].into_boxed_slice(), Uuid::new_v4());
        let clone = snapshot.clone();
        assert_eq!(snapshot.size_bytes(), 3);
        assert_eq!(clone.origin(), snapshot.origin());
        assert_eq!(clone.bytes(), snapshot.bytes());
    }
}
