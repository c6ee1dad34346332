//! Return addresses and the diagnostic call-stack.

use crate::runtime::runtime_error::ErrorKind;

#[derive(Debug)]
pub struct CallStack {
    return_addresses: Vec<usize>,
    max_depth: usize,
    /// Human-readable frame labels. Only used for traces.
    labels: Vec<String>,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            return_addresses: Vec::new(),
            max_depth,
            labels: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.return_addresses.len()
    }

    pub fn push_return(&mut self, address: usize) -> Result<(), ErrorKind> {
        if self.return_addresses.len() >= self.max_depth {
            return Err(ErrorKind::CallDepthExceeded {
                limit: self.max_depth,
            });
        }
        self.return_addresses.push(address);
        Ok(())
    }

    pub fn pop_return(&mut self) -> Result<usize, ErrorKind> {
        self.return_addresses.pop().ok_or(ErrorKind::ReturnUnderflow)
    }

    pub fn truncate(&mut self, depth: usize) {
        self.return_addresses.truncate(depth);
    }

    pub fn push_label(&mut self, label: impl Into<String>) {
        self.labels.push(label.into());
    }

    /// Pop a diagnostic label. An unbalanced pop is reported, not fatal.
    pub fn pop_label(&mut self) -> Option<String> {
        let label = self.labels.pop();
        if label.is_none() {
            tracing::warn!("debug call-stack pop without matching push");
        }
        label
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn clear(&mut self) {
        self.return_addresses.clear();
        self.labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_underflow() {
        let mut cs = CallStack::new(8);
        assert_eq!(cs.pop_return(), Err(ErrorKind::ReturnUnderflow));
    }

    #[test]
    fn test_depth_limit() {
        let mut cs = CallStack::new(1);
        cs.push_return(4).unwrap();
        assert_eq!(
            cs.push_return(5),
            Err(ErrorKind::CallDepthExceeded { limit: 1 })
        );
        assert_eq!(cs.pop_return(), Ok(4));
    }

    #[test]
    fn test_labels_are_independent_of_returns() {
        let mut cs = CallStack::new(8);
        cs.push_label("main");
        cs.push_return(3).unwrap();
        assert_eq!(cs.pop_label().as_deref(), Some("main"));
        assert_eq!(cs.pop_label(), None);
        assert_eq!(cs.depth(), 1);
    }
}
