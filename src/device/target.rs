//! Calibrated device with its focus/debounce state machine.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{DeviceId, DeviceSink};
use crate::config::FocusConfig;
use crate::geometry::Vector3;

/// Whether a device is currently being pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    Idle,
    Focused,
}

/// Result of feeding one focus signal into a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    /// Nothing changed.
    Unchanged,
    /// The device just gained focus.
    Focused,
    /// The device just lost focus.
    Released,
    /// A toggle command was accepted; `on` is the new state.
    Toggled { on: bool },
    /// A toggle was due but the sink refused it.
    CommandFailed,
}

/// A device at a calibrated position.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    id: DeviceId,
    position: Vector3,
    windows: FocusConfig,
    state: FocusState,
    on: bool,
    focus_start_time: Instant,
    last_action_time: Instant,
}

impl DeviceTarget {
    /// Create an idle, switched-off target. Both timestamps start at `now`.
    pub fn new(id: DeviceId, position: Vector3, windows: FocusConfig, now: Instant) -> Self {
        Self {
            id,
            position,
            windows,
            state: FocusState::Idle,
            on: false,
            focus_start_time: now,
            last_action_time: now,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn focus_start_time(&self) -> Instant {
        self.focus_start_time
    }

    pub fn last_action_time(&self) -> Instant {
        self.last_action_time
    }

    /// The device is targeted this tick.
    pub fn notify_in_focus(&mut self, now: Instant, sink: &dyn DeviceSink) -> FocusOutcome {
        match self.state {
            FocusState::Idle => {
                self.state = FocusState::Focused;
                self.focus_start_time = self.focus_start_time.max(now);
                debug!(device = self.id, "Device in focus");
                FocusOutcome::Focused
            }
            FocusState::Focused => {
                let focused_for = now.saturating_duration_since(self.focus_start_time);
                let since_action = now.saturating_duration_since(self.last_action_time);
                if focused_for > self.windows.activation_window()
                    && since_action > self.windows.debounce_window()
                {
                    self.toggle(now, sink)
                } else {
                    FocusOutcome::Unchanged
                }
            }
        }
    }

    /// The device is not targeted this tick.
    pub fn notify_not_in_focus(&mut self) -> FocusOutcome {
        match self.state {
            FocusState::Focused => {
                self.state = FocusState::Idle;
                debug!(device = self.id, "Device lost focus");
                FocusOutcome::Released
            }
            FocusState::Idle => FocusOutcome::Unchanged,
        }
    }

    fn toggle(&mut self, now: Instant, sink: &dyn DeviceSink) -> FocusOutcome {
        let turning_on = !self.on;
        let result = if turning_on {
            sink.turn_on(self.id)
        } else {
            sink.turn_off(self.id)
        };

        // Failed attempts are rate-limited by the same debounce window.
        self.last_action_time = self.last_action_time.max(now);

        match result {
            Ok(()) => {
                self.on = turning_on;
                info!(
                    device = self.id,
                    "Switching device {}",
                    if turning_on { "on" } else { "off" }
                );
                FocusOutcome::Toggled { on: self.on }
            }
            Err(e) => {
                warn!(device = self.id, "Toggle command failed: {}", e);
                FocusOutcome::CommandFailed
            }
        }
    }

    /// Record a level set on the device outside the toggle path.
    pub fn set_level_applied(&mut self, percent: u8) {
        self.on = percent > 0;
    }

    /// Time left before the next toggle may fire, if focus were held.
    pub fn time_until_ready(&self, now: Instant) -> Duration {
        let activation = self
            .windows
            .activation_window()
            .saturating_sub(now.saturating_duration_since(self.focus_start_time));
        let debounce = self
            .windows
            .debounce_window()
            .saturating_sub(now.saturating_duration_since(self.last_action_time));
        activation.max(debounce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DeviceCommand, SimulatedRoom};

    fn windows() -> FocusConfig {
        FocusConfig {
            activation_window_ms: 400,
            debounce_window_ms: 2000,
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_first_focus_does_not_toggle() {
        let room = SimulatedRoom::new().with_device(7, Vector3::ZERO);
        let t0 = Instant::now();
        let mut target = DeviceTarget::new(7, Vector3::ZERO, windows(), t0);

        let outcome = target.notify_in_focus(t0 + ms(5000), &room);
        assert_eq!(outcome, FocusOutcome::Focused);
        assert_eq!(target.state(), FocusState::Focused);
        assert!(!target.is_on());
        assert!(room.commands().is_empty());
    }

    #[test]
    fn test_focus_windows() {
        let room = SimulatedRoom::new().with_device(7, Vector3::ZERO);
        let t0 = Instant::now();
        let mut target = DeviceTarget::new(7, Vector3::ZERO, windows(), t0);

        // Focus starts at t0 + 1000
        target.notify_in_focus(t0 + ms(1000), &room);

        // Before the activation window
        assert_eq!(target.notify_in_focus(t0 + ms(1300), &room), FocusOutcome::Unchanged);

        // Activation elapsed, but debounce since creation has not (1900 < 2000)
        assert_eq!(target.notify_in_focus(t0 + ms(1900), &room), FocusOutcome::Unchanged);
        assert!(!target.is_on());

        // Both windows elapsed
        let fire_at = t0 + ms(2100);
        assert_eq!(target.notify_in_focus(fire_at, &room), FocusOutcome::Toggled { on: true });
        assert!(target.is_on());
        assert_eq!(target.last_action_time(), fire_at);
        assert_eq!(room.commands(), vec![DeviceCommand::On(7)]);

        // Still focused: nothing until another debounce window passes
        assert_eq!(target.notify_in_focus(t0 + ms(2200), &room), FocusOutcome::Unchanged);
        assert_eq!(target.notify_in_focus(t0 + ms(4000), &room), FocusOutcome::Unchanged);
        assert_eq!(target.state(), FocusState::Focused);

        assert_eq!(
            target.notify_in_focus(t0 + ms(4200), &room),
            FocusOutcome::Toggled { on: false }
        );
        assert_eq!(room.commands(), vec![DeviceCommand::On(7), DeviceCommand::Off(7)]);
    }

    #[test]
    fn test_losing_focus_restarts_activation() {
        let room = SimulatedRoom::new().with_device(1, Vector3::ZERO);
        let t0 = Instant::now();
        let mut target = DeviceTarget::new(1, Vector3::ZERO, windows(), t0);

        target.notify_in_focus(t0 + ms(3000), &room);
        assert_eq!(target.notify_not_in_focus(), FocusOutcome::Released);
        assert_eq!(target.state(), FocusState::Idle);
        assert_eq!(target.notify_not_in_focus(), FocusOutcome::Unchanged);

        // Refocus: the activation window counts from the new focus start
        assert_eq!(target.notify_in_focus(t0 + ms(3500), &room), FocusOutcome::Focused);
        assert_eq!(target.notify_in_focus(t0 + ms(3800), &room), FocusOutcome::Unchanged);
        assert_eq!(
            target.notify_in_focus(t0 + ms(3950), &room),
            FocusOutcome::Toggled { on: true }
        );
    }

    #[test]
    fn test_failed_command_keeps_state() {
        let room = SimulatedRoom::new().with_device(3, Vector3::ZERO);
        room.set_devices_failing(true);
        let t0 = Instant::now();
        let mut target = DeviceTarget::new(3, Vector3::ZERO, windows(), t0);

        target.notify_in_focus(t0, &room);
        let fire_at = t0 + ms(2500);
        assert_eq!(target.notify_in_focus(fire_at, &room), FocusOutcome::CommandFailed);
        assert!(!target.is_on());
        assert_eq!(target.last_action_time(), fire_at);

        // Retry is debounced too
        assert_eq!(target.notify_in_focus(t0 + ms(3000), &room), FocusOutcome::Unchanged);

        room.set_devices_failing(false);
        assert_eq!(
            target.notify_in_focus(t0 + ms(4600), &room),
            FocusOutcome::Toggled { on: true }
        );
        assert!(room.is_on(3));
    }

    #[test]
    fn test_timestamps_never_move_backwards() {
        let room = SimulatedRoom::new().with_device(2, Vector3::ZERO);
        let t0 = Instant::now();
        let later = t0 + ms(10_000);
        let mut target = DeviceTarget::new(2, Vector3::ZERO, windows(), later);

        target.notify_in_focus(t0, &room);
        assert_eq!(target.focus_start_time(), later);
        assert_eq!(target.notify_in_focus(t0 + ms(1), &room), FocusOutcome::Unchanged);
        assert_eq!(target.last_action_time(), later);
    }

    #[test]
    fn test_applied_level_updates_on_flag() {
        let room = SimulatedRoom::new().with_device(4, Vector3::ZERO);
        let t0 = Instant::now();
        let mut target = DeviceTarget::new(4, Vector3::ZERO, windows(), t0);

        target.set_level_applied(30);
        assert!(target.is_on());
        target.set_level_applied(0);
        assert!(!target.is_on());

        // The next toggle switches the dark device on, not off
        target.notify_in_focus(t0, &room);
        assert_eq!(
            target.notify_in_focus(t0 + ms(2500), &room),
            FocusOutcome::Toggled { on: true }
        );
        assert_eq!(room.commands(), vec![DeviceCommand::On(4)]);
    }

    #[test]
    fn test_time_until_ready() {
        let room = SimulatedRoom::new().with_device(2, Vector3::ZERO);
        let t0 = Instant::now();
        let mut target = DeviceTarget::new(2, Vector3::ZERO, windows(), t0);
        target.notify_in_focus(t0 + ms(1800), &room);

        assert_eq!(target.time_until_ready(t0 + ms(1800)), ms(400));
        assert_eq!(target.time_until_ready(t0 + ms(2300)), Duration::ZERO);
    }
}
