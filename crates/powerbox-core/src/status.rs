//! Front-panel status LEDs and the cooling fan.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use log::warn;

use crate::config::LED_BLINK_MS;

/// Mode flags the LEDs reflect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusView {
    pub recording: bool,
    pub locked: bool,
    pub safety_stop: bool,
    pub script_active: bool,
}

/// Power, lock and stop LEDs.
///
/// The power LED blinks while recording; the lock LED blinks while a script
/// is running and not paused. Both share one blink phase.
pub struct StatusLeds<L: OutputPin> {
    power: L,
    lock: L,
    stop: L,
    blink_on: bool,
    last_toggle: u64,
}

impl<L: OutputPin> StatusLeds<L> {
    pub fn new(power: L, lock: L, stop: L) -> Self {
        Self {
            power,
            lock,
            stop,
            blink_on: true,
            last_toggle: 0,
        }
    }

    /// Advance the blink phase and write all three LEDs.
    pub fn update(&mut self, view: StatusView, now_ms: u64) {
        if now_ms.saturating_sub(self.last_toggle) >= LED_BLINK_MS {
            self.blink_on = !self.blink_on;
            self.last_toggle = now_ms;
        }

        let power = if view.recording { self.blink_on } else { true };
        let lock = if view.script_active {
            self.blink_on
        } else {
            view.locked
        };

        write_led(&mut self.power, power);
        write_led(&mut self.lock, lock);
        write_led(&mut self.stop, view.safety_stop);
    }
}

fn write_led<L: OutputPin>(led: &mut L, on: bool) {
    let result = if on { led.set_high() } else { led.set_low() };
    if let Err(e) = result {
        warn!("LED write failed: {:?}", e);
    }
}

/// PWM fan with an 8-bit speed setting.
pub struct Fan<P: SetDutyCycle> {
    pwm: P,
}

impl<P: SetDutyCycle> Fan<P> {
    pub fn new(pwm: P) -> Self {
        Self { pwm }
    }

    /// Apply the persisted fan settings. A disabled fan is driven at 0 duty.
    pub fn apply(&mut self, on: bool, speed: u8) {
        let speed = if on { speed } else { 0 };
        if let Err(e) = self.pwm.set_duty_cycle_fraction(speed as u16, 255) {
            warn!("Fan duty write failed: {:?}", e);
        }
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPin, SimPwm};

    fn leds() -> (StatusLeds<SimPin>, SimPin, SimPin, SimPin) {
        let (p, l, s) = (SimPin::new(), SimPin::new(), SimPin::new());
        (StatusLeds::new(p.clone(), l.clone(), s.clone()), p, l, s)
    }

    #[test]
    fn test_idle_leds() {
        let (mut leds, power, lock, stop) = leds();
        leds.update(
            StatusView {
                locked: true,
                ..Default::default()
            },
            0,
        );
        assert!(power.is_high(), "power LED solid when idle");
        assert!(lock.is_high());
        assert!(!stop.is_high());
    }

    #[test]
    fn test_recording_blinks_power_led() {
        let (mut leds, power, _, stop) = leds();
        let view = StatusView {
            recording: true,
            safety_stop: true,
            ..Default::default()
        };
        leds.update(view, 500);
        let first = power.is_high();
        leds.update(view, 700);
        assert_eq!(power.is_high(), first, "no toggle inside the half-period");
        leds.update(view, 1000);
        assert_ne!(power.is_high(), first);
        assert!(stop.is_high());
    }

    #[test]
    fn test_fan_disabled_is_zero_duty() {
        let pwm = SimPwm::new();
        let mut fan = Fan::new(pwm.clone());
        fan.apply(true, 255);
        assert_eq!(pwm.duty(), pwm.max());
        fan.apply(false, 200);
        assert_eq!(pwm.duty(), 0);
    }
}
