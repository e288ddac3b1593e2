//! `BufferArena` — fixed-size packet buffers in one anonymous mapping.
//!
//! Every ring slot refers to its buffer by index, never by address. The
//! arena is the only place that turns an index (or a mapping offset) into
//! memory.
//!
//! ```text
//!  base
//!   │
//!   ▼
//!  ┌─────────┬─────────┬─────────┬─────┬─────────┐
//!  │ buf 0   │ buf 1   │ buf 2   │ ... │ buf n-1 │   each buf_size bytes
//!  └─────────┴─────────┴─────────┴─────┴─────────┘
//!  offset = idx * buf_size
//! ```

use slotring_core::error::{Result, RingError};

/// Page size assumed for mapping-offset translation.
pub const PAGE_SIZE: usize = 4096;

pub struct BufferArena {
    base: *mut u8,
    /// Mapping length in bytes (page-rounded).
    map_len: usize,
    buf_size: usize,
    count: u32,
}

// Safety: the arena never hands out overlapping buffers on its own; who
// may touch buffer `i` is decided by the ring cursor protocol, which
// gives each slot (and so each buffer) to exactly one role at a time.
unsafe impl Send for BufferArena {}
unsafe impl Sync for BufferArena {}

impl BufferArena {
    /// Map `count` buffers of `buf_size` bytes.
    pub fn new(count: u32, buf_size: usize) -> Result<Self> {
        if count == 0 || buf_size == 0 {
            return Err(RingError::Os(libc::EINVAL));
        }
        let bytes = (count as usize)
            .checked_mul(buf_size)
            .ok_or(RingError::Os(libc::ENOMEM))?;
        let map_len = (bytes + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(RingError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::ENOMEM)));
        }

        Ok(Self {
            base: base as *mut u8,
            map_len,
            buf_size,
            count,
        })
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Total mapping length (what a consumer would mmap).
    #[inline]
    pub fn map_len(&self) -> usize {
        self.map_len
    }

    /// Translate a mapping offset to the backing address.
    ///
    /// Called once per page when a consumer maps the arena; `None` past
    /// the end of the mapping.
    pub fn map_offset(&self, offset: usize) -> Option<*const u8> {
        if offset >= self.map_len {
            return None;
        }
        Some(unsafe { self.base.add(offset) as *const u8 })
    }

    /// Mapping offset of buffer `idx`.
    #[inline]
    pub fn buf_offset(&self, idx: u32) -> usize {
        idx as usize * self.buf_size
    }

    /// Shared view of buffer `idx`.
    ///
    /// # Safety
    /// The caller must own buffer `idx` under the ring protocol, and no
    /// `&mut` to the same buffer may be live.
    #[inline]
    pub(crate) unsafe fn buf(&self, idx: u32) -> &[u8] {
        debug_assert!(idx < self.count);
        std::slice::from_raw_parts(self.base.add(self.buf_offset(idx)), self.buf_size)
    }

    /// Exclusive view of buffer `idx`.
    ///
    /// # Safety
    /// The caller must own buffer `idx` under the ring protocol, and no
    /// other reference to the same buffer may be live.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn buf_mut(&self, idx: u32) -> &mut [u8] {
        debug_assert!(idx < self.count);
        std::slice::from_raw_parts_mut(self.base.add(self.buf_offset(idx)), self.buf_size)
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        if !self.base.is_null() && self.map_len > 0 {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.map_len);
            }
            self.base = std::ptr::null_mut();
        }
    }
}
