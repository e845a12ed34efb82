//! Polling scheduler.
//!
//! Three dedicated threads drive the recurring inquiries: a fast cadence
//! (battery, voltages, load, status register), a slow cadence
//! (temperature, frequency, runtime, fault registers) and a one-time pass
//! (identity and settings, read once after connect).
//!
//! Write operations must not interleave with polling, so suspension is a
//! synchronous message-passing contract: [`PollerPool::pause`] sends a
//! suspend request to every cadence and blocks until each one
//! acknowledges from inside its loop, which guarantees no poll exchange
//! is in flight when the pause returns. Cadences resume when the guard
//! drops.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::calibration::{CalibrationSession, CalibrationState};
use crate::commands::{self, FAST_POLL_CMDS, ONCE_CMDS, SLOW_POLL_CMDS};
use crate::constants::{POLL_FAST_INTERVAL, POLL_SLOW_INTERVAL};
use crate::error::UpsError;
use crate::protocol::ProtocolEngine;
use crate::state::{PollTier, SharedState};

enum PollControl {
    Suspend(Sender<()>),
    Resume,
    Stop,
}

struct CadenceHandle {
    name: &'static str,
    ctrl: Sender<PollControl>,
    thread: Option<JoinHandle<()>>,
}

/// Owns the cadence threads for one connected session.
pub struct PollerPool {
    handles: Vec<CadenceHandle>,
}

/// Keeps every cadence parked. Dropping it sends the resume signal.
pub struct PollPause {
    ctrls: Vec<Sender<PollControl>>,
}

impl Drop for PollPause {
    fn drop(&mut self) {
        for ctrl in &self.ctrls {
            let _ = ctrl.send(PollControl::Resume);
        }
    }
}

impl PollerPool {
    /// Spawn the cadence threads. The one-time pass runs immediately and
    /// its thread exits when done; the fast and slow loops run until the
    /// pool is stopped.
    pub fn start(
        engine: Arc<ProtocolEngine>,
        state: SharedState,
        calibration: Arc<Mutex<CalibrationSession>>,
    ) -> Self {
        let once = spawn_cadence("poll-once", None, {
            let engine = engine.clone();
            let state = state.clone();
            move || {
                poll_pass(&engine, &state, ONCE_CMDS, PollTier::Once);
                state.update(|s| s.compute_load_watts());
                false
            }
        });

        let fast = spawn_cadence("poll-fast", Some(POLL_FAST_INTERVAL), {
            let engine = engine.clone();
            let state = state.clone();
            let calibration = calibration.clone();
            let mut saw_cal_bit = false;
            move || {
                poll_pass(&engine, &state, FAST_POLL_CMDS, PollTier::Fast);
                state.update(|s| s.compute_load_watts());
                feed_calibration(&state, &calibration, &mut saw_cal_bit);
                true
            }
        });

        let slow = spawn_cadence("poll-slow", Some(POLL_SLOW_INTERVAL), move || {
            poll_pass(&engine, &state, SLOW_POLL_CMDS, PollTier::Slow);
            true
        });

        PollerPool {
            handles: vec![once, fast, slow],
        }
    }

    /// Suspend every cadence, blocking until each has yielded the
    /// transport. A cadence whose thread has already finished (the
    /// one-time pass) counts as yielded.
    pub fn pause(&self) -> PollPause {
        let mut ctrls = Vec::new();
        for handle in &self.handles {
            let (ack_tx, ack_rx) = mpsc::channel();
            if handle.ctrl.send(PollControl::Suspend(ack_tx)).is_ok() {
                if ack_rx.recv().is_ok() {
                    log::debug!("{} suspended", handle.name);
                    ctrls.push(handle.ctrl.clone());
                }
            }
        }
        PollPause { ctrls }
    }

    /// Stop and join every cadence thread.
    pub fn stop(mut self) {
        for handle in &self.handles {
            let _ = handle.ctrl.send(PollControl::Stop);
        }
        for handle in &mut self.handles {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

/// Spawn one cadence loop. `interval` of `None` runs the body once.
/// The body returns false to end the cadence.
fn spawn_cadence(
    name: &'static str,
    interval: Option<Duration>,
    mut body: impl FnMut() -> bool + Send + 'static,
) -> CadenceHandle {
    let (ctrl_tx, ctrl_rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match interval {
            Some(interval) => loop {
                match ctrl_rx.recv_timeout(interval) {
                    Ok(PollControl::Suspend(ack)) => {
                        if !wait_for_resume(&ctrl_rx, ack) {
                            return;
                        }
                    }
                    Ok(PollControl::Resume) => {}
                    Ok(PollControl::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {
                        if !body() {
                            return;
                        }
                    }
                }
            },
            None => {
                body();
            }
        })
        .expect("spawn poll thread");
    CadenceHandle {
        name,
        ctrl: ctrl_tx,
        thread: Some(thread),
    }
}

/// Park until Resume. Returns false when the cadence should exit.
fn wait_for_resume(ctrl: &Receiver<PollControl>, ack: Sender<()>) -> bool {
    let _ = ack.send(());
    loop {
        match ctrl.recv() {
            Ok(PollControl::Resume) => return true,
            Ok(PollControl::Suspend(ack)) => {
                let _ = ack.send(());
            }
            Ok(PollControl::Stop) | Err(_) => return false,
        }
    }
}

/// Issue one pass of a command list, folding results into the state.
/// Timeouts are logged and skipped; the cadence keeps running.
fn poll_pass(engine: &ProtocolEngine, state: &SharedState, cmds: &[char], tier: PollTier) {
    for &code in cmds {
        let def = match commands::normal_command(code) {
            Ok(def) => def,
            Err(e) => {
                log::error!("{e}");
                continue;
            }
        };
        match engine.execute_with_retry(def) {
            Ok(response) => state.apply(code, &response, tier),
            Err(UpsError::Timeout { command }) => {
                log::warn!("Poll timeout on {command:?}");
                state.set_error(format!("Timeout on {command:?}"));
            }
            Err(e) => {
                log::error!("Poll error on {code:?}: {e}");
                state.set_error(e.to_string());
                return;
            }
        }
    }
}

/// Push fresh battery readings into an active calibration and detect the
/// device clearing its calibration status bit.
fn feed_calibration(
    state: &SharedState,
    calibration: &Arc<Mutex<CalibrationSession>>,
    saw_cal_bit: &mut bool,
) {
    let snapshot = state.snapshot();
    let bit_set = snapshot.registers.status.is_set("Runtime Calibration");
    let mut session = calibration.lock().unwrap();
    if session.state() == CalibrationState::Running {
        session.update_battery(snapshot.battery_capacity);
        if *saw_cal_bit && !bit_set && session.state() == CalibrationState::Running {
            session.handle(
                crate::calibration::CalibrationEvent::CompletionDetected,
                snapshot.battery_capacity,
            );
        }
    }
    *saw_cal_bit = bit_set;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AlertLog;
    use crate::mock::MockUps;
    use crate::transport::SystemClock;

    fn pool_with_mock() -> (PollerPool, SharedState) {
        let engine = Arc::new(ProtocolEngine::new(
            Box::new(MockUps::new()),
            Arc::new(SystemClock),
            Arc::new(AlertLog::new()),
        ));
        engine.enter_smart_mode().unwrap();
        let state = SharedState::new();
        let calibration = Arc::new(Mutex::new(CalibrationSession::new()));
        let pool = PollerPool::start(engine, state.clone(), calibration);
        (pool, state)
    }

    #[test]
    fn one_time_pass_fills_identity_fields() {
        let (pool, state) = pool_with_mock();
        // The once cadence runs immediately; give it a moment.
        for _ in 0..50 {
            if !state.snapshot().model.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        pool.stop();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.model, "Smart-UPS 2200 XL");
        assert_eq!(snapshot.serial_number, "AS1139244203");
        assert_eq!(snapshot.tier_of('n'), Some(PollTier::Once));
        assert_eq!(snapshot.smart_constant_0, "100");
    }

    #[test]
    fn pause_blocks_until_cadences_yield_and_resumes_on_drop() {
        let (pool, _state) = pool_with_mock();
        {
            let _pause = pool.pause();
            // Returning at all means every live cadence acknowledged.
        }
        // Cadences resumed: a second pause round-trips again.
        {
            let _pause = pool.pause();
        }
        pool.stop();
    }
}
