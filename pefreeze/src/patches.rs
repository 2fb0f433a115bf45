//! Deferred in-place patches and the deterministic gap checksum.
//!
//! All the patch locations are found before parsing finishes. If patching happened
//! while parsing, a parse failure could leave the image in an inconsistent state; so
//! a [`PatchSet`] collects `(offset, bytes, label)` records and applies them in one
//! pass at the very end.
//!
//! The sorted patch set also defines the *gap checksum*: an MD5 over the regions of
//! the image between the patches. Because the patched bytes themselves are excluded,
//! the digest is a pure function of the stable image content, which is exactly the
//! property needed for a deterministic PDB signature.

use md5::{Digest, Md5};

/// A range of bytes to overwrite. Totally ordered by `(offset, length)`.
///
/// Invariant, maintained by the callers: patches in one set never overlap.
#[derive(Debug, Clone)]
pub struct Patch {
    /// File offset to patch.
    pub offset: usize,
    /// Replacement bytes.
    pub bytes: Vec<u8>,
    /// Name of the patch; shows up in the log so a run explains itself.
    pub label: &'static str,
}

/// An ordered collection of [`Patch`] records.
#[derive(Debug, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    /// Creates an empty patch set.
    #[must_use]
    pub fn new() -> PatchSet {
        PatchSet::default()
    }

    /// Number of patches collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Returns `true` if no patches have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Iterates the patches in their current order.
    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    /// Appends a patch. No validation happens here; the caller guarantees the range
    /// lies inside the buffer it will later apply against.
    pub fn add(&mut self, offset: usize, bytes: Vec<u8>, label: &'static str) {
        debug_assert!(!bytes.is_empty());
        self.patches.push(Patch {
            offset,
            bytes,
            label,
        });
    }

    /// Convenience for the common case of patching a 32-bit little-endian field.
    pub fn add_u32(&mut self, offset: usize, value: u32, label: &'static str) {
        self.add(offset, value.to_le_bytes().to_vec(), label);
    }

    /// Re-binds the bytes of the patch with the given label.
    ///
    /// Used for the PDB signature, whose value is only known once the gap checksum
    /// over all *other* patch positions has been computed. The replacement must have
    /// the same length as the placeholder.
    pub fn set_bytes(&mut self, label: &str, bytes: &[u8]) {
        for patch in &mut self.patches {
            if patch.label == label {
                debug_assert_eq!(patch.bytes.len(), bytes.len());
                patch.bytes = bytes.to_vec();
            }
        }
    }

    /// Stable sort by `(offset, length)`.
    ///
    /// Sorting must precede both [`PatchSet::apply`] and [`PatchSet::gap_checksum`].
    pub fn sort(&mut self) {
        self.patches
            .sort_by_key(|patch| (patch.offset, patch.bytes.len()));
    }

    /// Applies the patches to `buf` in order.
    ///
    /// A patch whose target bytes already equal the replacement is skipped silently,
    /// so the log only shows what actually changed and re-running the tool on its own
    /// output is a quiet no-op. With `dry_run` set, changes are reported but nothing
    /// is written.
    pub fn apply(&self, buf: &mut [u8], dry_run: bool) {
        for patch in &self.patches {
            let end = patch.offset.checked_add(patch.bytes.len());
            let Some(target) = end.and_then(|end| buf.get_mut(patch.offset..end)) else {
                debug_assert!(false, "patch '{}' out of bounds", patch.label);
                continue;
            };

            if target == patch.bytes.as_slice() {
                continue;
            }

            log::info!(
                "Patching '{}' at offset 0x{:x} ({} bytes)",
                patch.label,
                patch.offset,
                patch.bytes.len()
            );

            if !dry_run {
                target.copy_from_slice(&patch.bytes);
            }
        }
    }

    /// Calculates the checksum of `buf`, skipping over the patched areas.
    ///
    /// This is used to replace the PDB signature with something deterministic: two
    /// builds that differ only in the fields being patched hash identically. The
    /// patch set must be sorted.
    ///
    /// MD5 is used because the signature slot happens to be 128 bits wide; any
    /// streaming 128-bit hash would do as well.
    #[must_use]
    pub fn gap_checksum(&self, buf: &[u8]) -> [u8; 16] {
        let mut hasher = Md5::new();
        let mut pos = 0;

        for patch in &self.patches {
            if patch.offset > pos {
                hasher.update(&buf[pos..patch.offset]);
            }
            pos = patch.offset + patch.bytes.len();
        }

        if pos < buf.len() {
            hasher.update(&buf[pos..]);
        }

        hasher.finalize().into()
    }
}
