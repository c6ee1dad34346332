//! Flat heap of value cells.
//!
//! Fixed size, bounds-checked, no reclamation: cells are only ever
//! overwritten by `HEAP_SET`.

use crate::lang::value::{HeapAddress, Value};
use crate::runtime::runtime_error::ErrorKind;

#[derive(Debug)]
pub struct Heap {
    cells: Vec<Value>,
}

impl Heap {
    pub fn new(size: usize) -> Self {
        Heap {
            cells: vec![Value::Null; size],
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, address: HeapAddress) -> Result<&Value, ErrorKind> {
        self.cells.get(address.0).ok_or(ErrorKind::HeapOutOfBounds {
            address,
            size: self.cells.len(),
        })
    }

    pub fn set(&mut self, address: HeapAddress, value: Value) -> Result<(), ErrorKind> {
        let size = self.cells.len();
        let cell = self
            .cells
            .get_mut(address.0)
            .ok_or(ErrorKind::HeapOutOfBounds { address, size })?;
        *cell = value;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_start_null() {
        let heap = Heap::new(4);
        assert_eq!(heap.get(HeapAddress(3)), Ok(&Value::Null));
    }

    #[test]
    fn test_set_then_get() {
        let mut heap = Heap::new(4);
        heap.set(HeapAddress(1), Value::Float32(0.5)).unwrap();
        assert_eq!(heap.get(HeapAddress(1)), Ok(&Value::Float32(0.5)));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut heap = Heap::new(2);
        assert_eq!(
            heap.get(HeapAddress(2)),
            Err(ErrorKind::HeapOutOfBounds {
                address: HeapAddress(2),
                size: 2
            })
        );
        assert!(heap.set(HeapAddress(9), Value::Null).is_err());
    }
}
