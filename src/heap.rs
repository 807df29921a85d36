use crate::error::Error;
use std::collections::HashMap;

/// First-fit allocator over the word-addressed data memory. Free spans are
/// kept sorted by address, pairwise disjoint and never adjacent.
pub struct Heap {
    size: usize,
    free_list: Vec<(usize, usize)>,
    alloc_blocks: HashMap<usize, usize>,
}

impl Heap {
    pub fn new(size: usize) -> Heap {
        Heap {
            size,
            free_list: vec![(0, size)],
            alloc_blocks: HashMap::new(),
        }
    }

    pub fn malloc(&mut self, size: usize) -> Result<usize, Error> {
        if size == 0 {
            return Err(Error::Runtime("zero-sized allocation".to_string()));
        }
        let i = match self.free_list.iter().position(|&(_, len)| len >= size) {
            Some(i) => i,
            None => {
                return Err(Error::OutOfMemory {
                    requested: size,
                    largest: self.largest_free(),
                })
            }
        };
        let (base, len) = self.free_list[i];
        if len == size {
            self.free_list.remove(i);
        } else {
            self.free_list[i] = (base + size, len - size);
        }
        self.alloc_blocks.insert(base, size);
        debug!("malloc {} words at {}", size, base);
        Ok(base)
    }

    pub fn free(&mut self, ptr: usize) -> Result<(), Error> {
        let size = match self.alloc_blocks.remove(&ptr) {
            Some(size) => size,
            None => return Err(Error::UnknownAddress(ptr)),
        };
        let i = self.free_list.partition_point(|&(base, _)| base < ptr);
        self.free_list.insert(i, (ptr, size));
        if i + 1 < self.free_list.len() && ptr + size == self.free_list[i + 1].0 {
            let (_, next) = self.free_list.remove(i + 1);
            self.free_list[i].1 += next;
            debug!("free {}: merged with following span", ptr);
        }
        if i > 0 {
            let (prev_base, prev_len) = self.free_list[i - 1];
            if prev_base + prev_len == ptr {
                let (_, len) = self.free_list.remove(i);
                self.free_list[i - 1].1 += len;
                debug!("free {}: merged with preceding span", ptr);
            }
        }
        debug!("free {} words at {}", size, ptr);
        Ok(())
    }

    pub fn largest_free(&self) -> usize {
        self.free_list.iter().map(|&(_, len)| len).max().unwrap_or(0)
    }

    pub fn free_spans(&self) -> &[(usize, usize)] {
        &self.free_list
    }

    /// Words currently handed out.
    pub fn used(&self) -> usize {
        self.size - self.free_list.iter().map(|&(_, len)| len).sum::<usize>()
    }

    #[cfg(test)]
    pub fn block_size(&self, ptr: usize) -> Option<usize> {
        self.alloc_blocks.get(&ptr).cloned()
    }

    #[cfg(test)]
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::MEM_SIZE;

    fn assert_invariant(heap: &Heap) {
        let spans = heap.free_spans();
        for w in spans.windows(2) {
            assert!(w[0].0 + w[0].1 < w[1].0, "spans {:?} overlap or touch", w);
        }
        let free: usize = spans.iter().map(|s| s.1).sum();
        let used: usize = heap.alloc_blocks.values().sum();
        assert_eq!(free + used, heap.size());
        assert_eq!(heap.used(), used);
    }

    #[test]
    fn test_first_fit_reuses_freed_prefix() {
        let mut heap = Heap::new(MEM_SIZE);
        let a = heap.malloc(100).unwrap();
        let b = heap.malloc(50).unwrap();
        assert_eq!((a, b), (0, 100));
        heap.free(a).unwrap();
        assert_eq!(heap.malloc(100).unwrap(), 0);
        assert_invariant(&heap);
    }

    #[test]
    fn test_smaller_request_splits_span() {
        let mut heap = Heap::new(MEM_SIZE);
        let a = heap.malloc(100).unwrap();
        heap.malloc(10).unwrap();
        heap.free(a).unwrap();
        assert_eq!(heap.malloc(40).unwrap(), 0);
        assert_eq!(heap.free_spans()[0], (40, 60));
        assert_invariant(&heap);
    }

    #[test]
    fn test_free_in_any_order_restores_pool() {
        let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
        for order in &orders {
            let mut heap = Heap::new(MEM_SIZE);
            let ptrs: Vec<usize> = [16, 7, 300, 1].iter().map(|&n| heap.malloc(n).unwrap()).collect();
            for &i in order {
                heap.free(ptrs[i]).unwrap();
                assert_invariant(&heap);
            }
            assert_eq!(heap.free_spans(), &[(0, MEM_SIZE)]);
        }
    }

    #[test]
    fn test_free_bordering_both_neighbours() {
        let mut heap = Heap::new(64);
        let a = heap.malloc(8).unwrap();
        let b = heap.malloc(8).unwrap();
        let c = heap.malloc(8).unwrap();
        heap.free(a).unwrap();
        heap.free(c).unwrap();
        assert_eq!(heap.free_spans(), &[(0, 8), (16, 48)]);
        heap.free(b).unwrap();
        assert_eq!(heap.free_spans(), &[(0, 64)]);
    }

    #[test]
    fn test_out_of_memory_reports_largest() {
        let mut heap = Heap::new(100);
        heap.malloc(60).unwrap();
        match heap.malloc(50) {
            Err(Error::OutOfMemory { requested, largest }) => {
                assert_eq!(requested, 50);
                assert_eq!(largest, 40);
            }
            other => panic!("expected out of memory, got {:?}", other),
        }
        assert_invariant(&heap);
    }

    #[test]
    fn test_bad_frees() {
        let mut heap = Heap::new(100);
        let a = heap.malloc(10).unwrap();
        assert!(heap.free(a + 1).is_err());
        heap.free(a).unwrap();
        assert!(heap.free(a).is_err());
        assert!(heap.malloc(0).is_err());
    }
}
