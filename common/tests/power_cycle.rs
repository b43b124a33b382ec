//! End-to-end power-cycle scenarios against an in-memory store.

use pretty_assertions::assert_eq;
use smart_switch_common::{
    route,
    store::{BOOT_COUNT_OFFSET, ERASED_BYTE},
    Command, MemoryStore, NonVolatileStore, OutputError, RelayOutput, RelayState, RelaySwitch,
    SwitchConfig, Transition,
};

#[derive(Debug, Default)]
struct MockRelay {
    calls: Vec<RelayState>,
}

impl RelayOutput for MockRelay {
    fn drive(&mut self, state: RelayState) -> Result<(), OutputError> {
        self.calls.push(state);
        Ok(())
    }
}

type Switch = RelaySwitch<MemoryStore, MockRelay>;

fn boot(store: MemoryStore) -> (Switch, smart_switch_common::BootReport) {
    RelaySwitch::boot(store, MockRelay::default(), &SwitchConfig::default()).unwrap()
}

/// Cuts power and boots again from whatever was committed.
fn reboot(switch: Switch) -> (Switch, smart_switch_common::BootReport) {
    let (store, _) = switch.into_parts();
    boot(store.power_cycle())
}

#[test]
fn scenario_a_fresh_store_boots_on() {
    let (switch, report) = boot(MemoryStore::from_bytes([ERASED_BYTE, 0]));

    assert_eq!(switch.current_state(), RelayState::On);
    assert_eq!(report.boot_count, 1);
    assert!(!report.forced_safe_default);
    assert_eq!(report.corrupt_relay_byte, Some(ERASED_BYTE));
}

#[test]
fn scenario_b_fifth_boot_forces_safe_default() {
    let (switch, report) = boot(MemoryStore::from_bytes([RelayState::OFF_BYTE, 4]));

    assert!(report.forced_safe_default);
    assert_eq!(switch.current_state(), RelayState::On);
    assert_eq!(switch.output().calls, vec![RelayState::On]);
    assert_eq!(
        switch.store().committed(),
        [RelayState::ON_BYTE, 0],
        "both values persisted"
    );
}

#[test]
fn scenario_c_query_suffix_still_turns_on() {
    let (mut switch, _) = boot(MemoryStore::from_bytes([RelayState::OFF_BYTE, 0]));

    let (command, response) = route(&mut switch, "GET /on?x=1 HTTP/1.1").unwrap();

    assert_eq!(command, Command::TurnOn);
    assert_eq!(response.body, "Relay turned on");
    assert_eq!(switch.current_state(), RelayState::On);
}

#[test]
fn scenario_d_unknown_path_shows_page() {
    let (mut switch, _) = boot(MemoryStore::from_bytes([RelayState::OFF_BYTE, 0]));

    let (command, response) = route(&mut switch, "GET /status HTTP/1.1").unwrap();

    assert_eq!(command, Command::Query);
    assert_eq!(response.status, 200);
    assert!(response.body.contains("relayToggle"));
    assert!(!response.body.contains(" checked>"));
}

#[test]
fn scenario_e_redundant_on_leaves_store_alone() {
    let (mut switch, _) = boot(MemoryStore::from_bytes([RelayState::ON_BYTE, 2]));
    let before = switch.store().committed();
    let writes = switch.store().write_count();

    assert_eq!(switch.set_state(RelayState::On).unwrap(), Transition::NoOp);

    assert_eq!(switch.store().committed(), before);
    assert_eq!(switch.store().write_count(), writes);
    assert_eq!(switch.store().read(BOOT_COUNT_OFFSET).unwrap(), 3);
    assert_eq!(switch.output().calls, vec![RelayState::On]);
}

#[test]
fn boot_count_tracks_consecutive_cold_starts() {
    let threshold = SwitchConfig::default().boot_loop_threshold;
    let (mut switch, report) = boot(MemoryStore::from_bytes([RelayState::OFF_BYTE, 0]));
    assert_eq!(report.boot_count, 1);

    for n in 2..threshold {
        let (next, report) = reboot(switch);
        switch = next;
        assert_eq!(report.boot_count, n);
        assert_eq!(switch.current_state(), RelayState::Off);
    }

    let (switch, report) = reboot(switch);
    assert!(report.forced_safe_default);
    assert_eq!(report.boot_count, 0);
    assert_eq!(switch.current_state(), RelayState::On);
}

#[test]
fn deliberate_toggle_clears_fault_standing() {
    let (mut switch, _) = boot(MemoryStore::from_bytes([RelayState::OFF_BYTE, 3]));
    assert_eq!(switch.store().read(BOOT_COUNT_OFFSET).unwrap(), 4);

    route(&mut switch, "GET /on HTTP/1.1").unwrap();
    assert_eq!(switch.store().committed(), [RelayState::ON_BYTE, 0]);

    // Would have been the fifth boot without the toggle.
    let (switch, report) = reboot(switch);
    assert!(!report.forced_safe_default);
    assert_eq!(report.boot_count, 1);
    assert_eq!(switch.current_state(), RelayState::On);
}

#[test]
fn last_set_state_survives_reboot() {
    let (mut switch, _) = boot(MemoryStore::erased());

    for target in [
        RelayState::Off,
        RelayState::On,
        RelayState::Off,
        RelayState::Off,
    ] {
        switch.set_state(target).unwrap();
        assert_eq!(switch.current_state(), target);
    }

    let (switch, report) = reboot(switch);
    assert_eq!(report.relay_state, RelayState::Off);
    assert_eq!(switch.current_state(), RelayState::Off);
}
