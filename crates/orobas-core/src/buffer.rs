//! Bounds-checked buffer cursors.
//!
//! A cursor is a `(base, length, position)` triple over a borrowed slice.
//! Engines only move the position forward through the checked `advance`
//! and `write` operations; [`ByteSink::rollback`] restores a saved
//! position when a partial write must not become visible.

use crate::error::{Error, Result};

/// Read cursor over caller input.
#[derive(Debug)]
pub struct ByteSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Bytes consumed since construction.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Mark `n` bytes as consumed.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.available() {
            return Err(Error::InvalidState {
                expected: "advance within input bounds",
                actual: "advance past end of input",
            });
        }
        self.pos += n;
        Ok(())
    }

    /// Take up to `max` bytes.
    pub fn take(&mut self, max: usize) -> &'a [u8] {
        let n = max.min(self.available());
        let taken = &self.data[self.pos..self.pos + n];
        self.pos += n;
        taken
    }

    /// Restore a position previously returned by [`ByteSource::position`].
    pub fn rewind_to(&mut self, pos: usize) {
        self.pos = pos.min(self.pos);
    }
}

/// Write cursor over caller output.
#[derive(Debug)]
pub struct ByteSink<'a> {
    data: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteSink<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Free space left.
    #[inline]
    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Bytes written since construction.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Everything written so far.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.pos]
    }

    /// Mutable view of everything written so far.
    pub fn written_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.pos]
    }

    /// Append all of `bytes`, or nothing.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.available() {
            return Err(Error::MoreOutputNeeded);
        }
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Append as much of `bytes` as fits; returns the count written.
    pub fn write_partial(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.available());
        self.data[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += n;
        n
    }

    /// Unwritten tail of the buffer, for encoders that fill it directly.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.pos..]
    }

    /// Commit `n` bytes filled through [`ByteSink::spare_mut`].
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if n > self.available() {
            return Err(Error::MoreOutputNeeded);
        }
        self.pos += n;
        Ok(())
    }

    /// Step back to a saved position, discarding later writes.
    pub fn rollback(&mut self, pos: usize) {
        self.pos = pos.min(self.pos);
    }
}
