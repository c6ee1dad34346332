//! Operand stack.
//!
//! Holds expression temporaries, locals (addressed relative to the base
//! pointer) and the saved base pointers of active calls.

use crate::lang::value::Value;
use crate::runtime::runtime_error::ErrorKind;

/// How an instruction's operand selects a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// `index = operand`
    Absolute,
    /// `index = base_pointer + operand`
    FrameRelative,
    /// `index = len + operand`, so `-1` is the top
    TopRelative,
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Value(Value),
    /// Base pointer of the caller, pushed by `CALL`.
    SavedBase(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    entry: Entry,
    tag: Option<String>,
}

#[derive(Debug)]
pub struct OperandStack {
    slots: Vec<Slot>,
    base_pointer: usize,
    max_size: usize,
}

impl OperandStack {
    pub fn new(max_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            base_pointer: 0,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn base_pointer(&self) -> usize {
        self.base_pointer
    }

    fn push_slot(&mut self, slot: Slot) -> Result<(), ErrorKind> {
        if self.slots.len() >= self.max_size {
            return Err(ErrorKind::StackOverflow {
                limit: self.max_size,
            });
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> Result<(), ErrorKind> {
        self.push_slot(Slot {
            entry: Entry::Value(value),
            tag: None,
        })
    }

    pub fn push_tagged(&mut self, value: Value, tag: impl Into<String>) -> Result<(), ErrorKind> {
        self.push_slot(Slot {
            entry: Entry::Value(value),
            tag: Some(tag.into()),
        })
    }

    pub fn pop(&mut self) -> Result<Value, ErrorKind> {
        let index = self
            .slots
            .len()
            .checked_sub(1)
            .ok_or(ErrorKind::StackUnderflow)?;
        if let Entry::SavedBase(_) = self.slots[index].entry {
            return Err(ErrorKind::FrameMarkerAccess { index });
        }
        match self.slots.pop() {
            Some(Slot {
                entry: Entry::Value(value),
                ..
            }) => Ok(value),
            _ => Err(ErrorKind::StackUnderflow),
        }
    }

    /// Drop the top value. Does nothing on an empty stack.
    pub fn discard(&mut self) -> Result<(), ErrorKind> {
        if self.slots.is_empty() {
            return Ok(());
        }
        self.pop().map(|_| ())
    }

    pub fn peek(&self) -> Result<&Value, ErrorKind> {
        match self.slots.len() {
            0 => Err(ErrorKind::StackUnderflow),
            len => self.get(len - 1),
        }
    }

    pub fn get(&self, index: usize) -> Result<&Value, ErrorKind> {
        match self.slots.get(index) {
            Some(Slot {
                entry: Entry::Value(value),
                ..
            }) => Ok(value),
            Some(_) => Err(ErrorKind::FrameMarkerAccess { index }),
            None => Err(self.invalid(index as i64)),
        }
    }

    /// Overwrite a slot. The slot's tag survives unless `override_tag`
    /// is set, in which case it is cleared.
    pub fn set(&mut self, index: usize, value: Value, override_tag: bool) -> Result<(), ErrorKind> {
        let invalid = self.invalid(index as i64);
        let slot = self.slots.get_mut(index).ok_or(invalid)?;
        if let Entry::SavedBase(_) = slot.entry {
            return Err(ErrorKind::FrameMarkerAccess { index });
        }
        slot.entry = Entry::Value(value);
        if override_tag {
            slot.tag = None;
        }
        Ok(())
    }

    pub fn tag(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(|s| s.tag.as_deref())
    }

    /// Attach a tag to the top value without touching the value itself.
    pub fn tag_top(&mut self, tag: impl Into<String>) -> Result<(), ErrorKind> {
        let slot = self.slots.last_mut().ok_or(ErrorKind::StackUnderflow)?;
        slot.tag = Some(tag.into());
        Ok(())
    }

    /// Turn an instruction operand into a slot index.
    pub fn resolve(&self, mode: Addressing, operand: i64) -> Result<usize, ErrorKind> {
        let origin = match mode {
            Addressing::Absolute => 0,
            Addressing::FrameRelative => self.base_pointer as i64,
            Addressing::TopRelative => self.slots.len() as i64,
        };
        let index = origin
            .checked_add(operand)
            .ok_or_else(|| self.invalid(operand))?;
        if index < 0 || index as usize >= self.slots.len() {
            return Err(self.invalid(index));
        }
        Ok(index as usize)
    }

    /// Save the current base pointer and open a frame on top of it.
    pub fn push_frame(&mut self) -> Result<(), ErrorKind> {
        self.push_slot(Slot {
            entry: Entry::SavedBase(self.base_pointer),
            tag: None,
        })?;
        self.base_pointer = self.slots.len();
        Ok(())
    }

    /// Pop the saved base pointer of the innermost frame and restore it.
    pub fn pop_frame(&mut self) -> Result<usize, ErrorKind> {
        match self.slots.last() {
            Some(Slot {
                entry: Entry::SavedBase(saved),
                ..
            }) => {
                let saved = *saved;
                self.slots.pop();
                self.base_pointer = saved;
                Ok(saved)
            }
            _ => Err(ErrorKind::MissingFrameMarker),
        }
    }

    /// Drop everything above `len` and restore `base_pointer`.
    pub fn truncate(&mut self, len: usize, base_pointer: usize) {
        self.slots.truncate(len);
        self.base_pointer = base_pointer.min(self.slots.len());
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.base_pointer = 0;
    }

    /// Values from bottom to top. Frame markers are skipped.
    pub fn values(&self) -> Vec<Value> {
        self.slots
            .iter()
            .filter_map(|slot| match &slot.entry {
                Entry::Value(value) => Some(value.clone()),
                Entry::SavedBase(_) => None,
            })
            .collect()
    }

    fn invalid(&self, index: i64) -> ErrorKind {
        ErrorKind::InvalidStackAccess {
            index,
            len: self.slots.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stack() -> OperandStack {
        OperandStack::new(64)
    }

    #[test]
    fn test_pop_empty_is_underflow() {
        assert_eq!(stack().pop(), Err(ErrorKind::StackUnderflow));
    }

    #[test]
    fn test_discard_empty_is_noop() {
        let mut s = stack();
        assert_eq!(s.discard(), Ok(()));
        assert!(s.is_empty());
    }

    #[test]
    fn test_overflow() {
        let mut s = OperandStack::new(1);
        s.push(Value::Int32(1)).unwrap();
        assert_eq!(
            s.push(Value::Int32(2)),
            Err(ErrorKind::StackOverflow { limit: 1 })
        );
    }

    #[test]
    fn test_set_preserves_tag_by_default() {
        let mut s = stack();
        s.push_tagged(Value::Int32(1), "counter").unwrap();
        s.set(0, Value::Int32(2), false).unwrap();
        assert_eq!(s.tag(0), Some("counter"));
        assert_eq!(s.get(0), Ok(&Value::Int32(2)));

        s.set(0, Value::Int32(3), true).unwrap();
        assert_eq!(s.tag(0), None);
    }

    #[test]
    fn test_tag_top_keeps_value() {
        let mut s = stack();
        s.push(Value::Byte(9)).unwrap();
        s.tag_top("x").unwrap();
        assert_eq!(s.peek(), Ok(&Value::Byte(9)));
        assert_eq!(s.tag(0), Some("x"));
    }

    #[test]
    fn test_addressing_modes() {
        let mut s = stack();
        s.push(Value::Int32(10)).unwrap();
        s.push_frame().unwrap();
        s.push(Value::Int32(20)).unwrap();
        s.push(Value::Int32(30)).unwrap();

        assert_eq!(s.base_pointer(), 2);
        assert_eq!(s.resolve(Addressing::Absolute, 0), Ok(0));
        assert_eq!(s.resolve(Addressing::FrameRelative, 1), Ok(3));
        assert_eq!(s.resolve(Addressing::TopRelative, -1), Ok(3));
        assert_eq!(s.resolve(Addressing::FrameRelative, -2), Ok(0));
        assert!(s.resolve(Addressing::TopRelative, 0).is_err());
        assert!(s.resolve(Addressing::Absolute, -1).is_err());
    }

    #[test]
    fn test_resolve_rejects_overflowing_operand() {
        let mut s = stack();
        s.push(Value::Int32(1)).unwrap();
        assert_eq!(
            s.resolve(Addressing::TopRelative, i64::MAX),
            Err(ErrorKind::InvalidStackAccess { index: i64::MAX, len: 1 })
        );
        assert!(s.resolve(Addressing::FrameRelative, i64::MIN).is_err());
    }

    #[test]
    fn test_frame_marker_is_not_a_value() {
        let mut s = stack();
        s.push_frame().unwrap();
        assert_eq!(s.get(0), Err(ErrorKind::FrameMarkerAccess { index: 0 }));
        assert_eq!(s.pop(), Err(ErrorKind::FrameMarkerAccess { index: 0 }));
        assert_eq!(s.pop_frame(), Ok(0));
        assert!(s.is_empty());
    }

    #[test]
    fn test_pop_frame_requires_marker() {
        let mut s = stack();
        s.push(Value::Int32(1)).unwrap();
        assert_eq!(s.pop_frame(), Err(ErrorKind::MissingFrameMarker));
    }

    #[test]
    fn test_nested_frames_restore_base_pointer() {
        let mut s = stack();
        s.push_frame().unwrap();
        s.push(Value::Null).unwrap();
        s.push_frame().unwrap();
        assert_eq!(s.base_pointer(), 3);
        s.pop_frame().unwrap();
        assert_eq!(s.base_pointer(), 1);
        s.pop().unwrap();
        s.pop_frame().unwrap();
        assert_eq!(s.base_pointer(), 0);
    }

    proptest! {
        #[test]
        fn prop_push_pop_is_lifo(values in proptest::collection::vec(any::<i32>(), 0..32)) {
            let mut s = stack();
            for v in &values {
                s.push(Value::Int32(*v)).unwrap();
            }
            for v in values.iter().rev() {
                prop_assert_eq!(s.pop(), Ok(Value::Int32(*v)));
            }
            prop_assert!(s.is_empty());
        }
    }
}
