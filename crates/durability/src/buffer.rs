//! In-memory command-log ring buffer.
//!
//! A fixed-size byte ring owned by the write path. Records are always laid
//! out contiguously: when a record does not fit between `tail` and the end
//! of the ring, the tail wraps to the start and `last` marks where valid
//! bytes in the upper region end. The flusher consumes from `head` and
//! reclaims the upper region once it drains up to `last`.
//!
//! Shape invariants:
//! - unwrapped: `head <= tail`, `last == None`
//! - wrapped:   `head > tail`, `last ∈ [tail, size)`
//! - empty iff `head == tail` and `last == None`
//!
//! The ring is never full. Reservation reports "no room" instead, and the
//! caller flushes and retries.

use cinder_core::CmdLogError;

/// Result of one reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reserve {
    /// Space for the record is available at the current tail.
    pub ready: bool,
    /// The tail wrapped to the start of the ring during this attempt.
    /// The caller must close the open flush slot so flush requests stay
    /// contiguous in memory.
    pub wrapped: bool,
}

/// Fixed-size contiguous byte ring.
pub(crate) struct LogBuffer {
    data: Box<[u8]>,
    head: u32,
    tail: u32,
    last: Option<u32>,
}

impl LogBuffer {
    /// Allocate a ring of `size` bytes.
    pub(crate) fn new(size: u32) -> Result<Self, CmdLogError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size as usize)
            .map_err(|_| CmdLogError::OutOfMemory)?;
        data.resize(size as usize, 0);
        Ok(LogBuffer {
            data: data.into_boxed_slice(),
            head: 0,
            tail: 0,
            last: None,
        })
    }

    pub(crate) fn size(&self) -> u32 {
        self.data.len() as u32
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail && self.last.is_none()
    }

    /// One pass of the reservation policy for `len` contiguous bytes.
    ///
    /// May wrap the tail as a side effect. When not ready, the caller must
    /// flush to advance `head` and then try again.
    pub(crate) fn reserve(&mut self, len: u32) -> Reserve {
        debug_assert!(len < self.size());

        // An empty ring has nothing in flight, so it can restart at the
        // origin; a record close to the ring size then never lacks room.
        if self.head == self.tail && self.last.is_none() {
            self.head = 0;
            self.tail = 0;
        }

        if self.head <= self.tail {
            debug_assert!(self.last.is_none());
            // head == tail is the empty state; the ring is never full.
            if len < self.size() - self.tail {
                return Reserve {
                    ready: true,
                    wrapped: false,
                };
            }
            if self.head > 0 {
                self.last = Some(self.tail);
                self.tail = 0;
                return Reserve {
                    ready: len < self.head,
                    wrapped: true,
                };
            }
            Reserve {
                ready: false,
                wrapped: false,
            }
        } else {
            debug_assert!(self.last.is_some());
            Reserve {
                ready: len < self.head - self.tail,
                wrapped: false,
            }
        }
    }

    /// Mutable view of the next `len` bytes at the tail.
    ///
    /// Valid only after a `ready` reservation of at least `len` bytes.
    pub(crate) fn tail_slice(&mut self, len: u32) -> &mut [u8] {
        let at = self.tail as usize;
        &mut self.data[at..at + len as usize]
    }

    pub(crate) fn advance_tail(&mut self, len: u32) {
        self.tail += len;
        debug_assert!(self.tail < self.size());
    }

    /// The next `len` bytes awaiting flush at the head.
    pub(crate) fn head_slice(&self, len: u32) -> &[u8] {
        let at = self.head as usize;
        &self.data[at..at + len as usize]
    }

    pub(crate) fn advance_head(&mut self, len: u32) {
        self.head += len;
        debug_assert!(match self.last {
            Some(last) => self.head <= last,
            None => self.head <= self.tail,
        });
    }

    /// Reclaim the wrapped upper region once the flusher drains it.
    pub(crate) fn reclaim_if_drained(&mut self) {
        if self.last == Some(self.head) {
            self.last = None;
            self.head = 0;
        }
    }
}
