//! Host-side driver that walks a program through its lifecycle.
//!
//! ```text
//! Initialized -> SetGlobalVariables -> CallCodeEntry -> CallUpdate (repeats)
//!             -> CallCodeEnd -> DisposeGlobalVariables -> CodeExecuted
//! ```
//!
//! Each [`Host::tick`] does one unit of work: fire due timers, execute one
//! instruction, or, once the machine has stopped, move to the next phase.
//! Any error moves the host to [`Phase::Aborted`].

use std::fmt;

use crate::bytecode::Role;
use crate::runtime::runtime_error::{ErrorKind, VmError, VmResult};
use crate::runtime::timer::TimerHandle;
use crate::runtime::vm_bc::{FrameSnapshot, VmBc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialized,
    /// Jump to the globals block, which ends with `EXIT`.
    SetGlobalVariables,
    /// Call the entry routine once.
    CallCodeEntry,
    /// Call the update routine until the program exits.
    CallUpdate,
    CallCodeEnd,
    DisposeGlobalVariables,
    CodeExecuted,
    Aborted,
}

impl Phase {
    pub const fn name(self) -> &'static str {
        match self {
            Phase::Initialized => "Initialized",
            Phase::SetGlobalVariables => "SetGlobalVariables",
            Phase::CallCodeEntry => "CallCodeEntry",
            Phase::CallUpdate => "CallUpdate",
            Phase::CallCodeEnd => "CallCodeEnd",
            Phase::DisposeGlobalVariables => "DisposeGlobalVariables",
            Phase::CodeExecuted => "CodeExecuted",
            Phase::Aborted => "Aborted",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Phase::CodeExecuted | Phase::Aborted)
    }

    /// Routine run while in this phase, if any.
    const fn role(self) -> Option<Role> {
        match self {
            Phase::SetGlobalVariables => Some(Role::SetGlobals),
            Phase::CallCodeEntry => Some(Role::Entry),
            Phase::CallUpdate => Some(Role::Update),
            Phase::CallCodeEnd => Some(Role::End),
            Phase::DisposeGlobalVariables => Some(Role::DisposeGlobals),
            _ => None,
        }
    }

    /// Called routines get a frame and a return; the others are jumped to.
    const fn is_call(self) -> bool {
        matches!(
            self,
            Phase::CallCodeEntry | Phase::CallUpdate | Phase::CallCodeEnd
        )
    }

    /// Transition table. `exited` is whether the finished routine ended
    /// with `EXIT`.
    pub const fn next(self, exited: bool) -> Phase {
        match (self, exited) {
            (Phase::Initialized, _) => Phase::SetGlobalVariables,
            (Phase::SetGlobalVariables, _) => Phase::CallCodeEntry,
            (Phase::CallCodeEntry, false) => Phase::CallUpdate,
            (Phase::CallCodeEntry, true) => Phase::CallCodeEnd,
            (Phase::CallUpdate, false) => Phase::CallUpdate,
            (Phase::CallUpdate, true) => Phase::CallCodeEnd,
            (Phase::CallCodeEnd, _) => Phase::DisposeGlobalVariables,
            (Phase::DisposeGlobalVariables, _) => Phase::CodeExecuted,
            (Phase::CodeExecuted, _) => Phase::CodeExecuted,
            (Phase::Aborted, _) => Phase::Aborted,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Host {
    vm: VmBc,
    phase: Phase,
    timers: TimerHandle,
    /// Stack depth before the current called routine, for unwinding an
    /// `EXIT` that happened inside it.
    frame: Option<FrameSnapshot>,
}

impl Host {
    pub fn new(vm: VmBc) -> Self {
        Self::with_timers(vm, TimerHandle::new())
    }

    /// Drive `vm` with a timer queue that builtins may already hold.
    pub fn with_timers(vm: VmBc, timers: TimerHandle) -> Self {
        Self {
            vm,
            phase: Phase::Initialized,
            timers,
            frame: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn vm(&self) -> &VmBc {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut VmBc {
        &mut self.vm
    }

    pub fn timers(&self) -> TimerHandle {
        self.timers.clone()
    }

    /// Advance by one unit of work and report the phase afterwards.
    pub fn tick(&mut self) -> VmResult<Phase> {
        if self.phase.is_terminal() {
            return Ok(self.phase);
        }

        match self.step() {
            Ok(()) => Ok(self.phase),
            Err(err) => {
                tracing::error!(
                    phase = %self.phase,
                    position = ?err.position,
                    "{err}"
                );
                self.phase = Phase::Aborted;
                self.timers.clear();
                Err(err)
            }
        }
    }

    /// Tick until the program has fully executed.
    pub fn run(&mut self) -> VmResult<()> {
        while !self.tick()?.is_terminal() {}
        Ok(())
    }

    fn step(&mut self) -> VmResult<()> {
        if self.timers.is_pending() {
            self.timers.advance(&mut self.vm)?;
            return Ok(());
        }

        let has_routine = self.has_routine(self.phase);
        if has_routine && self.vm.is_running() {
            self.vm.tick()?;
            return Ok(());
        }

        // A phase without a routine counts as exited.
        let exited = self.vm.exit_requested() || !has_routine;
        let next = self.phase.next(exited);
        self.leave();
        self.enter(next)
    }

    fn has_routine(&self, phase: Phase) -> bool {
        phase
            .role()
            .is_some_and(|role| self.vm.entry_points().get(role).is_some())
    }

    fn leave(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.vm.unwind(frame);
        }
        if self.phase != Phase::Initialized {
            self.vm.call_stack_pop();
        }
    }

    fn enter(&mut self, phase: Phase) -> VmResult<()> {
        tracing::debug!(from = %self.phase, to = %phase, "host transition");
        self.phase = phase;

        if phase == Phase::CodeExecuted {
            self.vm.destroy();
            return Ok(());
        }

        self.vm.call_stack_push(format!("state: {}", phase));

        let Some(role) = phase.role() else {
            return Ok(());
        };
        let Some(offset) = self.vm.entry_points().get(role) else {
            if role == Role::Entry {
                return Err(VmError::new(ErrorKind::MissingEntryPoint { role: role.name() })
                    .with_call_stack(self.vm.call_stack().labels()));
            }
            // Nothing to run; the next tick moves on.
            return Ok(());
        };

        if phase.is_call() {
            self.frame = Some(self.vm.snapshot_frame());
            self.vm.call(offset)
        } else {
            self.vm.jump(offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(Phase::Initialized.next(false), Phase::SetGlobalVariables);
        assert_eq!(Phase::SetGlobalVariables.next(true), Phase::CallCodeEntry);
        assert_eq!(Phase::CallCodeEntry.next(false), Phase::CallUpdate);
        assert_eq!(Phase::CallCodeEntry.next(true), Phase::CallCodeEnd);
        assert_eq!(Phase::CallUpdate.next(false), Phase::CallUpdate);
        assert_eq!(Phase::CallUpdate.next(true), Phase::CallCodeEnd);
        assert_eq!(Phase::CallCodeEnd.next(true), Phase::DisposeGlobalVariables);
        assert_eq!(Phase::DisposeGlobalVariables.next(true), Phase::CodeExecuted);
        assert_eq!(Phase::Aborted.next(false), Phase::Aborted);
    }

    #[test]
    fn test_only_entry_update_end_are_called() {
        assert!(Phase::CallCodeEntry.is_call());
        assert!(Phase::CallUpdate.is_call());
        assert!(!Phase::SetGlobalVariables.is_call());
        assert!(!Phase::DisposeGlobalVariables.is_call());
    }
}
