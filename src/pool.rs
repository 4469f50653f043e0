use std::sync::{Mutex, PoisonError};

/// Reusable output buffers for rendering.
///
/// A buffer handed out by [`BufferPool::get`] is always empty, whatever the
/// previous render left in it.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16)
    }
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    pub fn get(&self) -> Vec<u8> {
        let mut buf = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_come_back_empty() {
        let pool = BufferPool::default();
        let mut buf = pool.get();
        buf.extend_from_slice(b"leftover");
        let capacity = buf.capacity();
        pool.put(buf);

        let again = pool.get();
        assert!(again.is_empty());
        assert_eq!(again.capacity(), capacity);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(1);
        pool.put(Vec::new());
        pool.put(Vec::new());
        assert_eq!(pool.pooled(), 1);
    }
}
