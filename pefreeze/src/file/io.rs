//! Low-level byte order and safe read/write utilities for PE, MSF and PDB parsing.
//!
//! This module provides the [`ByteIo`] trait for safe, little-endian access to primitive
//! types inside byte slices. Everything these file formats store is little-endian, so no
//! big-endian counterpart exists.

/// Trait for implementing type specific safe readers / writers.
///
/// This trait abstracts over reading and writing primitive types at arbitrary offsets of
/// a byte slice. It is implemented for the integer types that occur in PE headers and PDB
/// substreams.
pub trait ByteIo: Sized {
    #[allow(missing_docs)]
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Decode T from its little-endian byte representation
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Encode T into its little-endian byte representation
    fn to_le_bytes(self) -> Self::Bytes;
}

// Implement ByteIo support for u8
impl ByteIo for u8 {
    type Bytes = [u8; 1];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u8::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u8::to_le_bytes(self)
    }
}

// Implement ByteIo support for u16
impl ByteIo for u16 {
    type Bytes = [u8; 2];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u16::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u16::to_le_bytes(self)
    }
}

// Implement ByteIo support for u32
impl ByteIo for u32 {
    type Bytes = [u8; 4];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u32::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u32::to_le_bytes(self)
    }
}

// Implement ByteIo support for i32
impl ByteIo for i32 {
    type Bytes = [u8; 4];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        i32::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        i32::to_le_bytes(self)
    }
}

// Implement ByteIo support for u64
impl ByteIo for u64 {
    type Bytes = [u8; 8];

    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        u64::from_le_bytes(bytes)
    }

    fn to_le_bytes(self) -> Self::Bytes {
        u64::to_le_bytes(self)
    }
}

/// Read T in little-endian from `data` at `offset`, advancing `offset` past the value.
///
/// Returns `None` when the read would cross the end of the slice; the caller raises its
/// own semantic error naming the field that was missing.
pub fn read_le_at<T: ByteIo>(data: &[u8], offset: &mut usize) -> Option<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len)?;
    if end > data.len() {
        return None;
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return None;
    };

    *offset = end;

    Some(T::from_le_bytes(read))
}

/// Read T in little-endian from `data` at a fixed `offset`.
pub fn read_le<T: ByteIo>(data: &[u8], offset: usize) -> Option<T> {
    let mut pos = offset;
    read_le_at(data, &mut pos)
}

/// Write T in little-endian into `data` at `offset`.
///
/// Returns `None` when the write would cross the end of the slice.
pub fn write_le<T: ByteIo>(data: &mut [u8], offset: usize, value: T) -> Option<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len)?;
    if end > data.len() {
        return None;
    }

    data[offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    Some(())
}
