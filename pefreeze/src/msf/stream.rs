//! Stream views over MSF content.
//!
//! A stream is made up of 1 or more pages; these types abstract away the page
//! indirection so the data reads as if it were sequential.
//!
//! Two backings exist and the set is closed:
//!
//! - [`FileStream`] - pages read on demand from the container file. This is what the
//!   reader hands out; streams that pass through a rewrite untouched are copied
//!   page-by-page from here.
//! - [`MemoryStream`] - a plain in-memory buffer supporting mutation, growth and
//!   truncation. Every stream a patcher touches is first materialised into one of
//!   these and then swapped into the container in place of the file view.
//!
//! Reads never fail on short data: they return the number of bytes actually read and
//! the caller compares against what it needed.

use std::{
    cmp::min,
    fs,
    io::{Read, Seek, SeekFrom},
    sync::Arc,
};

use crate::Result;

/// A read view of one MSF stream, either file-backed or memory-backed.
#[derive(Debug)]
pub enum StreamView {
    /// Pages resolved through the container file on every read.
    File(FileStream),
    /// A materialised, mutable copy.
    Memory(MemoryStream),
}

impl StreamView {
    /// Returns the length of the stream, in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            StreamView::File(stream) => stream.len(),
            StreamView::Memory(stream) => stream.len(),
        }
    }

    /// Returns `true` if the stream holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the current read position, in bytes.
    #[must_use]
    pub fn pos(&self) -> usize {
        match self {
            StreamView::File(stream) => stream.pos(),
            StreamView::Memory(stream) => stream.pos(),
        }
    }

    /// Sets the current read position, clamping at the stream length.
    pub fn set_pos(&mut self, pos: usize) {
        match self {
            StreamView::File(stream) => stream.set_pos(pos),
            StreamView::Memory(stream) => stream.set_pos(pos),
        }
    }

    /// Reads up to `buf.len()` bytes, advancing the position.
    ///
    /// Returns the number of bytes read, which is less than requested at the end of
    /// the stream. Short reads are not an error here; callers raise their own when
    /// the count does not satisfy them.
    ///
    /// # Errors
    /// Only I/O failures of the underlying file surface as errors.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            StreamView::File(stream) => stream.read(buf),
            StreamView::Memory(stream) => Ok(stream.read(buf)),
        }
    }

    /// Copies the entire stream into a new [`MemoryStream`], leaving the read
    /// position where it was.
    ///
    /// # Errors
    /// Returns an error if the underlying file cannot be read, or the stream turns
    /// out shorter than its recorded length.
    pub fn materialize(&mut self) -> Result<MemoryStream> {
        let length = self.len();
        let mut data = vec![0u8; length];

        let saved = self.pos();
        self.set_pos(0);
        let read = self.read(&mut data)?;
        self.set_pos(saved);

        if read != length {
            return Err(invalid_msf!("stream is shorter than its recorded length"));
        }

        Ok(MemoryStream::new(data))
    }
}

/// A stream whose pages live in the container file.
///
/// Holds the page list and reads pages lazily. The length is the logical stream
/// length; the final page is padded in the file and reads within it may return those
/// padding bytes, exactly as the on-disk layout stores them.
#[derive(Debug)]
pub struct FileStream {
    file: Arc<fs::File>,
    page_size: usize,
    pages: Vec<u32>,
    length: usize,
    pos: usize,
}

impl FileStream {
    /// Creates a view over `pages` of `file`.
    ///
    /// ## Arguments
    /// * 'file'      - The container file
    /// * 'page_size' - The container page size
    /// * 'length'    - Logical stream length in bytes
    /// * 'pages'     - The stream's page numbers, in stream order
    #[must_use]
    pub fn new(file: Arc<fs::File>, page_size: usize, length: usize, pages: Vec<u32>) -> FileStream {
        FileStream {
            file,
            page_size,
            pages,
            length,
            pos: 0,
        }
    }

    /// Logical stream length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the stream holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current read position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Sets the read position, clamping at the stream length.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = min(self.length, pos);
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut remaining = buf.len();
        let mut total = 0;

        while remaining > 0 {
            let index = self.pos / self.page_size;
            let offset = self.pos % self.page_size;

            let Some(&page) = self.pages.get(index) else {
                break;
            };

            let chunk = min(remaining, self.page_size - offset);
            let read = self.read_from_page(page, offset, &mut buf[total..total + chunk])?;

            total += read;
            self.pos += read;

            if read != chunk {
                break;
            }

            remaining -= chunk;
        }

        Ok(total)
    }

    fn read_from_page(&self, page: u32, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file.as_ref();
        file.seek(SeekFrom::Start(
            page as u64 * self.page_size as u64 + offset as u64,
        ))?;

        // Loop until the buffer is full or the file runs out; a single read() is
        // allowed to return less than asked for.
        let mut total = 0;
        while total < buf.len() {
            let read = file.read(&mut buf[total..])?;
            if read == 0 {
                break;
            }
            total += read;
        }

        Ok(total)
    }
}

/// A stream materialised into memory.
///
/// Unlike [`FileStream`] this supports mutation through [`MemoryStream::data_mut`],
/// growth through [`MemoryStream::write`] and truncation through
/// [`MemoryStream::resize`].
#[derive(Debug, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryStream {
    /// Wraps an owned buffer.
    #[must_use]
    pub fn new(data: Vec<u8>) -> MemoryStream {
        MemoryStream { data, pos: 0 }
    }

    /// Length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read/write position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Sets the position. Positions past the end clamp to the end.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = min(self.data.len(), pos);
    }

    /// Borrows the underlying bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Borrows the underlying bytes for in-place patching.
    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Resizes the buffer to `length` bytes, truncating or zero-extending.
    pub fn resize(&mut self, length: usize) {
        self.data.resize(length, 0);
        self.pos = min(self.pos, length);
    }

    /// Reads up to `buf.len()` bytes from the current position.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.pos >= self.data.len() {
            return 0;
        }

        let available = min(self.data.len() - self.pos, buf.len());
        buf[..available].copy_from_slice(&self.data[self.pos..self.pos + available]);
        self.pos += available;

        available
    }

    /// Writes `buf` at the current position, growing the stream on overflow.
    pub fn write(&mut self, buf: &[u8]) {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }

        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
    }
}
