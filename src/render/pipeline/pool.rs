use std::sync::Mutex;

/// Typed free-list of reusable buffers with a hard allocation ceiling.
///
/// Ownership contract: a buffer taken from the pool has exactly one live owner
/// (the job chain holding it) until that chain's completion callback releases
/// it back. The pool never hands the same buffer to two takers.
#[derive(Debug)]
pub struct BufferPool<T> {
    state: Mutex<PoolState<T>>,
    buffer_len: usize,
    capacity: usize,
}

#[derive(Debug)]
struct PoolState<T> {
    free: Vec<Vec<T>>,
    allocated: usize,
}

impl<T: Clone + Default> BufferPool<T> {
    /// `capacity` is the ceiling on buffers alive at once (free + taken).
    pub fn new(buffer_len: usize, capacity: usize) -> BufferPool<T> {
        BufferPool {
            state: Mutex::new(PoolState {
                free: Vec::new(),
                allocated: 0,
            }),
            buffer_len,
            capacity,
        }
    }

    /// Returns a free buffer, allocating a fresh one while under the ceiling.
    /// `None` means the pool is at its ceiling and the caller should back off
    /// (skip the resolve, retry next batch).
    pub fn take(&self) -> Option<Vec<T>> {
        let mut state = self.state.lock().expect("pool lock poisoned");
        if let Some(buffer) = state.free.pop() {
            return Some(buffer);
        }
        if state.allocated < self.capacity {
            state.allocated += 1;
            return Some(vec![T::default(); self.buffer_len]);
        }
        None
    }

    /// Releases a buffer back to the free list. Only the owning job chain's
    /// completion callback calls this; contents are left as-is and simply
    /// overwritten by the next owner.
    pub fn release(&self, buffer: Vec<T>) {
        debug_assert_eq!(buffer.len(), self.buffer_len);
        let mut state = self.state.lock().expect("pool lock poisoned");
        debug_assert!(state.free.len() < state.allocated);
        state.free.push(buffer);
    }

    /// Drops every free buffer. Outstanding buffers remain owned by their jobs
    /// and count against the ceiling until released and reset again.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("pool lock poisoned");
        let dropped = state.free.len();
        state.free.clear();
        state.allocated -= dropped;
    }

    /// Buffers currently alive (free + taken).
    pub fn allocated(&self) -> usize {
        self.state.lock().expect("pool lock poisoned").allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn take_allocates_up_to_capacity_and_no_further() {
        let pool: BufferPool<u32> = BufferPool::new(16, 3);

        let a = pool.take().unwrap();
        let b = pool.take().unwrap();
        let c = pool.take().unwrap();
        assert!(pool.take().is_none());
        assert!(pool.allocated() == 3);

        pool.release(a);
        assert!(pool.take().is_some());
        assert!(pool.allocated() == 3);

        drop(b);
        drop(c);
    }

    #[test]
    fn released_buffer_is_reused_not_reallocated() {
        let pool: BufferPool<u32> = BufferPool::new(4, 2);

        let mut buffer = pool.take().unwrap();
        buffer[0] = 42;
        let pointer = buffer.as_ptr();
        pool.release(buffer);

        let reused = pool.take().unwrap();
        assert!(reused.as_ptr() == pointer);
        // Contents are left as-is; owners overwrite what they need.
        assert!(reused[0] == 42);
    }

    #[test]
    fn reset_drops_free_buffers() {
        let pool: BufferPool<u32> = BufferPool::new(4, 2);

        let buffer = pool.take().unwrap();
        let pointer = buffer.as_ptr();
        pool.release(buffer);
        pool.reset();
        assert!(pool.allocated() == 0);

        // A fresh allocation after reset; reuse of the dropped buffer would be
        // a coincidence of the allocator, so only the ceiling is checked.
        let fresh = pool.take().unwrap();
        let _ = pointer;
        assert!(pool.allocated() == 1);
        drop(fresh);
    }

    #[test]
    fn arbitrary_take_release_sequences_respect_the_ceiling() {
        let pool: BufferPool<u8> = BufferPool::new(8, 4);
        let mut held = Vec::new();

        // Deterministic but irregular take/release pattern.
        for step in 0u32..200 {
            if step % 3 != 0 {
                if let Some(buffer) = pool.take() {
                    held.push(buffer);
                }
            } else if !held.is_empty() {
                pool.release(held.remove(0));
            }
            assert!(pool.allocated() <= 4);
        }
    }
}
