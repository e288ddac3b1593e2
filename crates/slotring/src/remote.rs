//! `RemoteFragments` — scatter/gather over another process's memory.
//!
//! Fragments are `(address, length)` pairs in the target's address space.
//! Copies go through `process_vm_readv`/`process_vm_writev`; an address
//! the target has not mapped surfaces as `CopyFault`, which the transfer
//! engine reports as `MemoryFault`.

use std::io::{IoSlice, IoSliceMut};

use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;

use slotring_core::sg::{CopyFault, SgSink, SgSource};

pub struct RemoteFragments {
    pid: Pid,
    iov: Vec<RemoteIoVec>,
}

impl RemoteFragments {
    pub fn new(pid: i32, fragments: &[(usize, usize)]) -> Self {
        Self {
            pid: Pid::from_raw(pid),
            iov: fragments
                .iter()
                .map(|&(base, len)| RemoteIoVec { base, len })
                .collect(),
        }
    }

    fn remote(&self, idx: usize, offset: usize, len: usize) -> Result<RemoteIoVec, CopyFault> {
        let frag = self.iov[idx];
        if offset.checked_add(len).map_or(true, |end| end > frag.len) {
            return Err(CopyFault);
        }
        Ok(RemoteIoVec { base: frag.base + offset, len })
    }
}

impl SgSource for RemoteFragments {
    fn fragment_count(&self) -> usize {
        self.iov.len()
    }

    fn fragment_len(&self, idx: usize) -> usize {
        self.iov[idx].len
    }

    fn read_fragment(&self, idx: usize, offset: usize, dst: &mut [u8]) -> Result<(), CopyFault> {
        let want = dst.len();
        let remote = [self.remote(idx, offset, want)?];
        match process_vm_readv(self.pid, &mut [IoSliceMut::new(dst)], &remote) {
            Ok(n) if n == want => Ok(()),
            _ => Err(CopyFault),
        }
    }
}

impl SgSink for RemoteFragments {
    fn fragment_count(&self) -> usize {
        self.iov.len()
    }

    fn fragment_len(&self, idx: usize) -> usize {
        self.iov[idx].len
    }

    fn write_fragment(&mut self, idx: usize, offset: usize, src: &[u8]) -> Result<(), CopyFault> {
        let remote = [self.remote(idx, offset, src.len())?];
        match process_vm_writev(self.pid, &[IoSlice::new(src)], &remote) {
            Ok(n) if n == src.len() => Ok(()),
            _ => Err(CopyFault),
        }
    }
}
