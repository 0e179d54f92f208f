//! Bounded byte queue with flow-control flags.
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Fifo {
    buf: VecDeque<u8>,
    depth: usize,
}

impl Fifo {
    pub fn new(depth: usize) -> Self {
        Fifo {
            buf: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.depth
    }

    /// A byte can be popped.
    pub fn readable(&self) -> bool {
        !self.is_empty()
    }

    /// A byte can be pushed.
    pub fn writable(&self) -> bool {
        !self.is_full()
    }

    /// Appends a byte, handing it back when the queue is full.
    pub fn push(&mut self, byte: u8) -> Result<(), u8> {
        if self.is_full() {
            return Err(byte);
        }
        self.buf.push_back(byte);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut fifo = Fifo::new(4);
        for b in [3, 1, 2] {
            fifo.push(b).unwrap();
        }
        assert_eq!(fifo.pop(), Some(3));
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn refuses_writes_when_full() {
        let mut fifo = Fifo::new(2);
        fifo.push(0xaa).unwrap();
        fifo.push(0xbb).unwrap();
        assert!(fifo.is_full());
        assert!(!fifo.writable());
        assert_eq!(fifo.push(0xcc), Err(0xcc));
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.pop(), Some(0xaa));
        assert!(fifo.writable());
    }
}
