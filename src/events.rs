//! Asynchronous alert notifications.
//!
//! A UPS in Smart Mode may emit single unterminated bytes at any point in
//! the stream, including in the middle of a command response. The protocol
//! engine recognizes them and records an [`AlertEvent`] in the session's
//! [`AlertLog`] without disturbing the response in progress.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The ten asynchronous alert conditions a Smart-UPS reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alert {
    /// `!` UPS transferred to battery
    LineFail,
    /// `$` Back on line power
    LineRestored,
    /// `%` Low battery
    LowBattery,
    /// `+` Battery recharged
    LowBatteryCleared,
    /// `?` Abnormal condition
    AbnormalCondition,
    /// `=` Return from abnormal condition
    AbnormalCleared,
    /// `*` UPS about to turn load off
    ImminentShutdown,
    /// `#` Replace battery
    ReplaceBattery,
    /// `&` Check alarm register for fault
    CheckAlarmRegister,
    /// `|` EEPROM variable changed
    EepromChanged,
}

impl Alert {
    /// Classify a raw byte as an alert, if it is one.
    pub fn from_byte(byte: u8) -> Option<Alert> {
        match byte {
            b'!' => Some(Alert::LineFail),
            b'$' => Some(Alert::LineRestored),
            b'%' => Some(Alert::LowBattery),
            b'+' => Some(Alert::LowBatteryCleared),
            b'?' => Some(Alert::AbnormalCondition),
            b'=' => Some(Alert::AbnormalCleared),
            b'*' => Some(Alert::ImminentShutdown),
            b'#' => Some(Alert::ReplaceBattery),
            b'&' => Some(Alert::CheckAlarmRegister),
            b'|' => Some(Alert::EepromChanged),
            _ => None,
        }
    }

    /// The wire character for this alert.
    pub fn code(&self) -> char {
        match self {
            Alert::LineFail => '!',
            Alert::LineRestored => '$',
            Alert::LowBattery => '%',
            Alert::LowBatteryCleared => '+',
            Alert::AbnormalCondition => '?',
            Alert::AbnormalCleared => '=',
            Alert::ImminentShutdown => '*',
            Alert::ReplaceBattery => '#',
            Alert::CheckAlarmRegister => '&',
            Alert::EepromChanged => '|',
        }
    }

    /// Human-readable meaning.
    pub fn description(&self) -> &'static str {
        match self {
            Alert::LineFail => "Line fail: UPS transferred to battery",
            Alert::LineRestored => "Return from line fail: back on line power",
            Alert::LowBattery => "Low battery",
            Alert::LowBatteryCleared => "Return from low battery: battery recharged",
            Alert::AbnormalCondition => "Abnormal condition",
            Alert::AbnormalCleared => "Return from abnormal condition",
            Alert::ImminentShutdown => "UPS about to turn load off",
            Alert::ReplaceBattery => "Replace battery",
            Alert::CheckAlarmRegister => "Check alarm register for fault",
            Alert::EepromChanged => "EEPROM variable changed",
        }
    }
}

/// One observed alert with its arrival time.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    /// The alert condition
    pub alert: Alert,
    /// When the byte was observed
    pub at: DateTime<Utc>,
}

struct AlertLogInner {
    entries: Vec<AlertEvent>,
    subscriber: Option<Sender<AlertEvent>>,
}

/// Ordered, append-only record of every alert observed on the session.
///
/// The protocol engine appends strictly in arrival order, so an alert that
/// arrived before a response byte is visible here before that response is
/// delivered to its caller. A single subscriber can additionally receive
/// events over a channel.
pub struct AlertLog {
    inner: Mutex<AlertLogInner>,
}

impl AlertLog {
    pub fn new() -> Self {
        AlertLog {
            inner: Mutex::new(AlertLogInner {
                entries: Vec::new(),
                subscriber: None,
            }),
        }
    }

    /// Append an alert, stamping it with the current time.
    pub fn record(&self, alert: Alert) {
        log::info!("Alert: {}", alert.description());
        let event = AlertEvent {
            alert,
            at: Utc::now(),
        };
        let mut inner = self.inner.lock().unwrap();
        if let Some(tx) = &inner.subscriber {
            // A dropped receiver just means nobody is listening anymore.
            let _ = tx.send(event.clone());
        }
        inner.entries.push(event);
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<AlertEvent> {
        self.inner.lock().unwrap().entries.clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a channel subscriber. Replaces any previous subscriber;
    /// events recorded before the call are not replayed.
    pub fn subscribe(&self) -> Receiver<AlertEvent> {
        let (tx, rx) = mpsc::channel();
        self.inner.lock().unwrap().subscriber = Some(tx);
        rx
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_alert_round_trips_through_its_code() {
        for byte in [
            b'!', b'$', b'%', b'+', b'?', b'=', b'*', b'#', b'&', b'|',
        ] {
            let alert = Alert::from_byte(byte).expect("known alert byte");
            assert_eq!(alert.code() as u8, byte);
        }
    }

    #[test]
    fn non_alert_bytes_are_not_classified() {
        assert_eq!(Alert::from_byte(b'Q'), None);
        assert_eq!(Alert::from_byte(b'\r'), None);
        assert_eq!(Alert::from_byte(0x00), None);
    }

    #[test]
    fn log_preserves_arrival_order() {
        let alerts = AlertLog::new();
        alerts.record(Alert::LineFail);
        alerts.record(Alert::LowBattery);
        alerts.record(Alert::LineRestored);

        let events: Vec<Alert> = alerts.events().iter().map(|e| e.alert).collect();
        assert_eq!(
            events,
            vec![Alert::LineFail, Alert::LowBattery, Alert::LineRestored]
        );
    }

    #[test]
    fn subscriber_receives_new_events() {
        let alerts = AlertLog::new();
        let rx = alerts.subscribe();
        alerts.record(Alert::ReplaceBattery);
        let event = rx.try_recv().expect("event delivered");
        assert_eq!(event.alert, Alert::ReplaceBattery);
    }
}
