//! Cold-start accounting and boot-loop protection.
//!
//! Every cold start bumps a persisted counter. A deliberate state change
//! clears it (see [`RelaySwitch::set_state`](crate::RelaySwitch::set_state)),
//! so reaching the threshold means the device was power-cycled repeatedly
//! without anyone operating the switch. The relay is then forced to the safe
//! default and the counter starts over.

use crate::{
    config::SwitchConfig,
    error::StoreError,
    store::{NonVolatileStore, BOOT_COUNT_OFFSET, RELAY_STATE_OFFSET},
    types::{BootReport, RelayState},
};

pub fn cold_start<S: NonVolatileStore>(
    store: &mut S,
    config: &SwitchConfig,
) -> Result<BootReport, StoreError> {
    // An erased counter cell reads 0xFF and must stay above any threshold.
    let threshold = config.boot_loop_threshold.clamp(1, 254);

    let raw_relay = store.read(RELAY_STATE_OFFSET)?;
    let (mut relay_state, corrupt_relay_byte) = match RelayState::from_byte(raw_relay) {
        Some(state) => (state, None),
        None => (config.safe_default, Some(raw_relay)),
    };

    let raw_count = store.read(BOOT_COUNT_OFFSET)?;
    let corrupt_boot_count = (raw_count > threshold).then_some(raw_count);
    let previous = if corrupt_boot_count.is_some() {
        0
    } else {
        raw_count
    };

    // Always persisted, even when the check below resets it again.
    let mut boot_count = previous.saturating_add(1);
    store.write(BOOT_COUNT_OFFSET, boot_count)?;
    store.commit()?;

    let forced_safe_default = boot_count >= threshold;
    if forced_safe_default {
        boot_count = 0;
        relay_state = config.safe_default;
    }

    let mut dirty = store.write_if_changed(BOOT_COUNT_OFFSET, boot_count)?;
    dirty |= store.write_if_changed(RELAY_STATE_OFFSET, relay_state.to_byte())?;
    if dirty {
        store.commit()?;
    }

    Ok(BootReport {
        relay_state,
        forced_safe_default,
        boot_count,
        corrupt_relay_byte,
        corrupt_boot_count,
    })
}
