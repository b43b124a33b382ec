use crate::{
    boot,
    config::SwitchConfig,
    error::{OutputError, SwitchError},
    store::{NonVolatileStore, BOOT_COUNT_OFFSET, RELAY_STATE_OFFSET},
    types::{BootReport, RelayState, Transition},
};

/// Drives the physical relay line. Implementations apply polarity.
pub trait RelayOutput {
    fn drive(&mut self, state: RelayState) -> Result<(), OutputError>;
}

/// Owns the relay state during runtime and is the only runtime writer of
/// the store.
#[derive(Debug)]
pub struct RelaySwitch<S, O> {
    store: S,
    output: O,
    state: RelayState,
}

impl<S: NonVolatileStore, O: RelayOutput> RelaySwitch<S, O> {
    /// Wraps an already reconciled store and drives the output to
    /// `initial_state`.
    pub fn new(store: S, mut output: O, initial_state: RelayState) -> Result<Self, SwitchError> {
        output.drive(initial_state)?;
        Ok(Self {
            store,
            output,
            state: initial_state,
        })
    }

    /// Runs cold-start accounting against `store` and restores the relay.
    pub fn boot(
        mut store: S,
        output: O,
        config: &SwitchConfig,
    ) -> Result<(Self, BootReport), SwitchError> {
        let report = boot::cold_start(&mut store, config)?;
        let switch = Self::new(store, output, report.relay_state)?;
        Ok((switch, report))
    }

    pub fn current_state(&self) -> RelayState {
        self.state
    }

    pub fn set_state(&mut self, target: RelayState) -> Result<Transition, SwitchError> {
        if target == self.state {
            return Ok(Transition::NoOp);
        }

        self.output.drive(target)?;
        self.state = target;

        // A deliberate change means the device is not stuck in a boot loop.
        let mut dirty = self
            .store
            .write_if_changed(RELAY_STATE_OFFSET, target.to_byte())?;
        dirty |= self.store.write_if_changed(BOOT_COUNT_OFFSET, 0)?;
        if dirty {
            self.store.commit()?;
        }

        Ok(Transition::Applied)
    }

    pub fn toggle(&mut self) -> Result<Transition, SwitchError> {
        self.set_state(self.state.inverted())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn into_parts(self) -> (S, O) {
        (self.store, self.output)
    }
}
