//! Scatter/gather abstraction over the caller's buffer list.
//!
//! The transfer engine walks fragments by index and byte offset; it never
//! needs the fragments to be contiguous or even addressable from this
//! process. Copies may fail (`CopyFault`) when the fragment lives in memory
//! the engine cannot reach, e.g. a remote address space.
//!
//! # Implementors
//!
//! - `[T] where T: Deref<Target = [u8]>`: `&[u8]`, `Vec<u8>`, `IoSlice`.
//!   Never faults.
//! - `[T] where T: DerefMut<Target = [u8]>`: `&mut [u8]`, `Vec<u8>`,
//!   `IoSliceMut`. Never faults.
//! - `RemoteFragments` (slotring crate): another process's iovecs, copied
//!   with `process_vm_readv`/`process_vm_writev`.

use std::ops::{Deref, DerefMut};

/// A copy to or from caller memory failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFault;

/// Source fragments for an outbound transfer.
pub trait SgSource {
    fn fragment_count(&self) -> usize;

    fn fragment_len(&self, idx: usize) -> usize;

    /// Copy `dst.len()` bytes of fragment `idx`, starting at `offset`.
    fn read_fragment(&self, idx: usize, offset: usize, dst: &mut [u8]) -> Result<(), CopyFault>;

    fn total_len(&self) -> usize {
        (0..self.fragment_count()).map(|i| self.fragment_len(i)).sum()
    }
}

/// Destination fragments for an inbound transfer.
pub trait SgSink {
    fn fragment_count(&self) -> usize;

    fn fragment_len(&self, idx: usize) -> usize;

    /// Copy `src` into fragment `idx`, starting at `offset`.
    fn write_fragment(&mut self, idx: usize, offset: usize, src: &[u8]) -> Result<(), CopyFault>;

    fn total_len(&self) -> usize {
        (0..self.fragment_count()).map(|i| self.fragment_len(i)).sum()
    }
}

impl<T: Deref<Target = [u8]>> SgSource for [T] {
    #[inline]
    fn fragment_count(&self) -> usize {
        self.len()
    }

    #[inline]
    fn fragment_len(&self, idx: usize) -> usize {
        self[idx].len()
    }

    fn read_fragment(&self, idx: usize, offset: usize, dst: &mut [u8]) -> Result<(), CopyFault> {
        let frag: &[u8] = &self[idx];
        let src = frag.get(offset..offset + dst.len()).ok_or(CopyFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl<T: DerefMut<Target = [u8]>> SgSink for [T] {
    #[inline]
    fn fragment_count(&self) -> usize {
        self.len()
    }

    #[inline]
    fn fragment_len(&self, idx: usize) -> usize {
        self[idx].len()
    }

    fn write_fragment(&mut self, idx: usize, offset: usize, src: &[u8]) -> Result<(), CopyFault> {
        let frag: &mut [u8] = &mut self[idx];
        let dst = frag.get_mut(offset..offset + src.len()).ok_or(CopyFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}
