use std::sync::Arc;

/// A window over shared, reference-counted storage.
///
/// Clones share the allocation; each clone owns its own window, so moving a
/// window never touches bytes other holders can see. Writes go through
/// [`Block::make_mut`] only.
#[derive(Clone)]
pub(crate) struct Block {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl Block {
    /// New exclusive block holding `bytes` at its end, with `slack` free bytes
    /// in front for later prepends.
    pub(crate) fn with_front_slack(bytes: &[u8], slack: usize) -> Self {
        let mut storage = vec![0u8; slack + bytes.len()];
        storage[slack..].copy_from_slice(bytes);
        Self {
            data: storage.into(),
            start: slack,
            len: bytes.len(),
        }
    }

    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            data: bytes.into(),
            start: 0,
            len,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Free bytes in front of the window.
    #[inline]
    pub(crate) fn front_slack(&self) -> usize {
        self.start
    }

    #[inline]
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Exclusive access to the storage, copying the window (and its front
    /// slack) into a fresh allocation first if anyone else holds it.
    pub(crate) fn make_mut(&mut self) -> &mut [u8] {
        if Arc::get_mut(&mut self.data).is_none() {
            let mut storage = vec![0u8; self.start + self.len];
            storage[self.start..].copy_from_slice(self.as_slice());
            self.data = storage.into();
        }
        match Arc::get_mut(&mut self.data) {
            Some(storage) => storage,
            None => unreachable!("freshly copied block storage is exclusive"),
        }
    }

    /// Grows the window `bytes.len()` to the front, writing `bytes` there.
    /// The caller guarantees `front_slack() >= bytes.len()`.
    pub(crate) fn prepend(&mut self, bytes: &[u8]) {
        debug_assert!(self.start >= bytes.len());
        let new_start = self.start - bytes.len();
        let end = self.start;
        self.make_mut()[new_start..end].copy_from_slice(bytes);
        self.start = new_start;
        self.len += bytes.len();
    }

    /// Drops `n` bytes from the front of the window.
    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.start += n;
        self.len -= n;
    }

    /// Keeps only the first `n` bytes of the window.
    #[inline]
    pub(crate) fn shorten(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.len = n;
    }

    /// Splits the window at `at`: `self` keeps the front, the returned block
    /// views the rest of the same storage.
    pub(crate) fn split_off(&mut self, at: usize) -> Block {
        debug_assert!(at <= self.len);
        let tail = Block {
            data: self.data.clone(),
            start: self.start + at,
            len: self.len - at,
        };
        self.len = at;
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_mut_copies_shared_storage_only() {
        let mut a = Block::with_front_slack(&[1, 2, 3], 4);
        let b = a.clone();
        assert!(a.is_shared());

        a.prepend(&[9]);
        assert_eq!(a.as_slice(), &[9, 1, 2, 3]);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
        assert!(!a.is_shared());
        assert!(!b.is_shared());

        let ptr = a.as_slice().as_ptr();
        a.prepend(&[8]);
        assert_eq!(a.as_slice(), &[8, 9, 1, 2, 3]);
        assert_eq!(unsafe { ptr.offset(-1) }, a.as_slice().as_ptr());
    }

    #[test]
    fn split_shares_storage() {
        let mut a = Block::from_vec(vec![1, 2, 3, 4]);
        let tail = a.split_off(1);
        assert_eq!(a.as_slice(), &[1]);
        assert_eq!(tail.as_slice(), &[2, 3, 4]);
        assert!(a.is_shared());
    }
}
