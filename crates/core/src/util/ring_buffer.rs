use std::collections::VecDeque;

/// Fixed-capacity FIFO that evicts the oldest entry once full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is bumped to one so `push` always retains the latest value.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends `value`, returning the evicted oldest entry when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(value);
        evicted
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut rb = RingBuffer::new(3);
        assert!(rb.is_empty());

        assert_eq!(rb.push(1), None);
        assert_eq!(rb.push(2), None);
        assert_eq!(rb.push(3), None);
        assert_eq!(rb.len(), 3);

        assert_eq!(rb.push(4), Some(1));
        assert_eq!(rb.to_vec(), vec![2, 3, 4]);
        assert_eq!(rb.latest(), Some(&4));
    }

    #[test]
    fn zero_capacity_still_keeps_latest() {
        let mut rb = RingBuffer::new(0);
        assert_eq!(rb.capacity(), 1);
        rb.push("a");
        assert_eq!(rb.push("b"), Some("a"));
        assert_eq!(rb.to_vec(), vec!["b"]);
        rb.clear();
        assert!(rb.latest().is_none());
    }
}
