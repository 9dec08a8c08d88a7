/// Packed bit vector, used both for validity (1 = present) and boolean values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64)),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits past the end read as unset.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Sets a bit, growing with unset bits when `index` is past the end.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.len {
            self.resize(index + 1);
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    #[inline]
    pub fn push(&mut self, value: bool) {
        let index = self.len;
        self.set(index, value);
    }

    /// Grows with unset bits or truncates.
    pub fn resize(&mut self, len: usize) {
        if len < self.len {
            self.words.truncate(len.div_ceil(64));
            if len % 64 != 0 {
                if let Some(last) = self.words.last_mut() {
                    *last &= (1u64 << (len % 64)) - 1;
                }
            }
        } else {
            self.words.resize(len.div_ceil(64), 0);
        }
        self.len = len;
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn byte_size(&self) -> usize {
        self.words.capacity() * std::mem::size_of::<u64>()
    }

    /// Drops the backing allocation.
    pub fn clear(&mut self) {
        self.words = Vec::new();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_grows_with_unset_bits() {
        let mut bits = Bitmap::new();
        bits.set(70, true);
        assert_eq!(bits.len(), 71);
        assert!(bits.get(70));
        assert!(!bits.get(3));
        assert!(!bits.get(500));
        assert_eq!(bits.count_ones(), 1);
    }

    #[test]
    fn test_truncate_clears_tail() {
        let mut bits = Bitmap::new();
        for _ in 0..10 {
            bits.push(true);
        }
        bits.resize(4);
        bits.resize(10);
        assert_eq!(bits.count_ones(), 4);
        assert!((0..4).all(|i| bits.get(i)));
        assert!(!(4..10).any(|i| bits.get(i)));
    }
}
