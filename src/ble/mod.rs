// Transport implementations for the peripheral link
//
// - `simulated`: in-process J1 robot for tests and `--simulate` runs
// - `central` (feature `ble`): real BLE central backed by btleplug

#[cfg(feature = "ble")]
pub mod central;
pub mod simulated;

#[cfg(feature = "ble")]
pub use central::BtleplugTransport;
pub use simulated::{SimHandle, SimulatedRobot};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock shared transport state; a panicked holder leaves plain data behind,
/// so the guard is recovered rather than propagated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
