// vim: tw=80

//! Device and array health state.

use enum_primitive_derive::Primitive;

/// The health of one member device, as seen by the external device-state
/// observer. Only `NORMAL` counts toward redundancy; every other variant
/// is treated as "abnormal" by [`crate::raid::RaidMethod::raid_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
pub enum DeviceState {
    Normal = 0,
    Fault = 1,
    Rebuild = 2,
}

impl DeviceState {
    pub fn is_normal(self) -> bool {
        self == DeviceState::Normal
    }
}

/// The derived health of an array/partition. Never stored; always
/// recomputed from the current device-state vector by
/// [`crate::raid::RaidMethod::raid_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RaidState {
    Normal,
    Degraded,
    Failure,
}

/// Returns, for one stripe, the ordered device state of every chunk
/// position. Indexed by chunk position within the stripe (`devs[i]` is
/// the state of the device that currently hosts chunk `i` of this
/// stripe). Invoked from arbitrary threads; implementations must be
/// `Send + Sync`.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait DeviceStateObserver: Send + Sync {
    fn device_states(&self, stripe_id: crate::geometry::StripeId) -> Vec<DeviceState>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::RwLock;

    /// A [`DeviceStateObserver`] backed by a fixed, settable vector.
    /// Complements the generated `MockDeviceStateObserver` for scenarios
    /// that flip one device's state mid-test rather than asserting a
    /// single expected call.
    pub struct FixedDeviceStates {
        states: RwLock<Vec<DeviceState>>,
    }

    impl FixedDeviceStates {
        pub fn new(states: Vec<DeviceState>) -> Self {
            FixedDeviceStates { states: RwLock::new(states) }
        }

        pub fn set(&self, idx: usize, state: DeviceState) {
            self.states.write().unwrap()[idx] = state;
        }
    }

    impl DeviceStateObserver for FixedDeviceStates {
        fn device_states(&self, _stripe_id: crate::geometry::StripeId) -> Vec<DeviceState> {
            self.states.read().unwrap().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock::FixedDeviceStates;

    #[test]
    fn is_normal_only_for_the_normal_variant() {
        assert!(DeviceState::Normal.is_normal());
        assert!(!DeviceState::Fault.is_normal());
        assert!(!DeviceState::Rebuild.is_normal());
    }

    #[test]
    fn fixed_device_states_reports_whatever_was_last_set() {
        let obs = FixedDeviceStates::new(vec![DeviceState::Normal, DeviceState::Normal]);
        assert_eq!(obs.device_states(0), vec![DeviceState::Normal, DeviceState::Normal]);
        obs.set(1, DeviceState::Fault);
        assert_eq!(obs.device_states(0), vec![DeviceState::Normal, DeviceState::Fault]);
    }

    #[test]
    fn mock_device_state_observer_satisfies_the_trait() {
        let mut mock = MockDeviceStateObserver::new();
        mock.expect_device_states()
            .withf(|&stripe_id| stripe_id == 7)
            .returning(|_| vec![DeviceState::Normal, DeviceState::Fault]);
        let states: Vec<DeviceState> = mock.device_states(7);
        assert_eq!(states, vec![DeviceState::Normal, DeviceState::Fault]);
    }
}
