//! A staged atomic modesetting request.

/// A position within an in-progress [`AtomicRequest`] that staging can be
/// rewound to, discarding everything added after it.
///
/// Mirrors `drmModeAtomicGetCursor`/`drmModeAtomicSetCursor`: the allocator
/// speculatively stages a plane, test-commits, and rewinds regardless of the
/// outcome before trying the next candidate.
pub type Cursor = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyChange {
    pub object_id: u32,
    pub property_id: u32,
    pub value: u64,
}

/// An accumulating set of object/property/value triples, built up by the
/// allocator and handed to a [`Backend`](crate::backend::Backend) for test
/// and real commits.
#[derive(Debug, Clone, Default)]
pub struct AtomicRequest {
    changes: Vec<PropertyChange>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        AtomicRequest { changes: Vec::new() }
    }

    pub fn cursor(&self) -> Cursor {
        self.changes.len()
    }

    pub fn rewind(&mut self, cursor: Cursor) {
        self.changes.truncate(cursor);
    }

    pub fn add_property(&mut self, object_id: u32, property_id: u32, value: u64) {
        self.changes.push(PropertyChange {
            object_id,
            property_id,
            value,
        });
    }

    pub fn changes(&self) -> &[PropertyChange] {
        &self.changes
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

bitflags::bitflags! {
    /// Flags accompanying a commit, matching the kernel's
    /// `DRM_MODE_ATOMIC_*`/`DRM_MODE_PAGE_FLIP_*` bits that are relevant here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommitFlags: u32 {
        const ALLOW_MODESET = 1 << 0;
        const PAGE_FLIP_EVENT = 1 << 1;
        const NONBLOCK = 1 << 2;
    }
}

impl CommitFlags {
    /// Test commits never want a page flip event queued; the allocator
    /// strips it before every probe, matching `device_test_commit`'s
    /// `flags &= ~DRM_MODE_PAGE_FLIP_EVENT` in the original implementation.
    pub(crate) fn for_test_commit(self) -> CommitFlags {
        self - CommitFlags::PAGE_FLIP_EVENT
    }
}
