//! Host-facing snapshot handles.

use std::collections::HashSet;

use crate::vm::MachineSnapshot;

/// An opaque, immutable capture of sandbox state: the complete engine
/// state plus the set of routing keys that were loaded when it was taken.
///
/// Created by [`LoadedSandbox::snapshot`]; applied any number of times
/// with [`LoadedSandbox::restore`], but only to the sandbox that produced
/// it. Clones share the underlying capture; it is freed when the last
/// clone is dropped.
///
/// [`LoadedSandbox::snapshot`]: crate::sandbox::LoadedSandbox::snapshot
/// [`LoadedSandbox::restore`]: crate::sandbox::LoadedSandbox::restore
#[derive(Clone)]
pub struct SandboxSnapshot {
    pub(crate) machine: MachineSnapshot,
    pub(crate) names: HashSet<String>,
}

impl SandboxSnapshot {
    /// Size of the captured engine state in bytes.
    pub fn size_bytes(&self) -> usize {
        self.machine.size_bytes()
    }
}

impl std::fmt::Debug for SandboxSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names.iter().collect();
        names.sort();
        f.debug_struct("SandboxSnapshot")
            .field("handlers", &names)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
