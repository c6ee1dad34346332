//! Cooperative "wait N host ticks, then run" queue.
//!
//! A [`TimerHandle`] is cheap to clone, so builtins can capture one and
//! schedule work from inside a callback. While anything is pending the
//! host stops ticking the machine; no instruction runs during a wait.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::runtime::runtime_error::VmResult;
use crate::runtime::vm_bc::VmBc;

pub type TimerAction = Box<dyn FnOnce(&mut VmBc) -> VmResult<()>>;

struct Timer {
    remaining: u32,
    action: TimerAction,
}

#[derive(Clone, Default)]
pub struct TimerHandle(Rc<RefCell<Vec<Timer>>>);

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("pending", &self.len())
            .finish()
    }
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `ticks` host ticks. Zero means the next tick.
    pub fn schedule<F>(&self, ticks: u32, action: F)
    where
        F: FnOnce(&mut VmBc) -> VmResult<()> + 'static,
    {
        tracing::debug!(ticks, "timer scheduled");
        self.0.borrow_mut().push(Timer {
            remaining: ticks.max(1),
            action: Box::new(action),
        });
    }

    pub fn is_pending(&self) -> bool {
        !self.0.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_pending()
    }

    /// Count one host tick down and fire every timer that reached zero,
    /// in scheduling order. Returns how many fired.
    pub fn advance(&self, vm: &mut VmBc) -> VmResult<usize> {
        // Due actions are taken out first so they may schedule new timers.
        let due: Vec<Timer> = {
            let mut timers = self.0.borrow_mut();
            for timer in timers.iter_mut() {
                timer.remaining -= 1;
            }
            let (due, waiting) = std::mem::take(&mut *timers)
                .into_iter()
                .partition(|t| t.remaining == 0);
            *timers = waiting;
            due
        };

        let fired = due.len();
        for timer in due {
            (timer.action)(vm)?;
        }
        Ok(fired)
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}
