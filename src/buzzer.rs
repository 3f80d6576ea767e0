//! Piezo buzzer on a PWM channel.

use embedded_hal::{blocking::delay::DelayMs, PwmPin};

/// Duty used for the fix cues, in percent.
pub const CUE_DUTY_PERCENT: u8 = 50;

/// A PWM channel whose timer period can be retuned.
pub trait SetFrequency {
    type Error;

    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error>;
}

/// One tone of a cue. A frequency of zero is a rest.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Note {
    pub hz: u32,
    pub ms: u32,
}

impl Note {
    pub const fn new(hz: u32, ms: u32) -> Self {
        Self { hz, ms }
    }
}

/// Rising pair, played when the receiver gets a fix.
pub const FIX_ACQUIRED: &[Note] = &[Note::new(880, 80), Note::new(0, 40), Note::new(1320, 120)];
/// Falling pair, played when the receiver loses it.
pub const FIX_LOST: &[Note] = &[Note::new(660, 120), Note::new(0, 40), Note::new(440, 200)];

pub struct Buzzer<PWM, D> {
    pwm: PWM,
    delay: D,
}

impl<PWM, D> Buzzer<PWM, D>
where
    PWM: PwmPin<Duty = u16> + SetFrequency,
    D: DelayMs<u32>,
{
    /// Takes the channel silent and enabled.
    pub fn new(mut pwm: PWM, delay: D) -> Self {
        pwm.set_duty(0);
        pwm.enable();
        Self { pwm, delay }
    }

    /// Blocks for `duration_ms` while the tone plays. The channel is silent
    /// again on return, also when retuning fails.
    pub fn tone(&mut self, frequency_hz: u32, duty_percent: u8, duration_ms: u32) -> Result<(), PWM::Error> {
        if frequency_hz == 0 {
            self.delay.delay_ms(duration_ms);
            return Ok(());
        }
        self.pwm.set_frequency(frequency_hz)?;
        let max = u32::from(self.pwm.get_max_duty());
        let duty = max * u32::from(duty_percent.min(100)) / 100;
        self.pwm.set_duty(duty as u16);
        self.delay.delay_ms(duration_ms);
        self.pwm.set_duty(0);
        Ok(())
    }

    pub fn play(&mut self, notes: &[Note]) -> Result<(), PWM::Error> {
        trace!("playing {} notes", notes.len());
        notes
            .iter()
            .try_for_each(|note| self.tone(note.hz, CUE_DUTY_PERCENT, note.ms))
    }

    pub fn release(mut self) -> (PWM, D) {
        self.pwm.set_duty(0);
        self.pwm.disable();
        (self.pwm, self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Enable,
        Disable,
        Frequency(u32),
        Duty(u16),
        Delay(u32),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct MockPwm {
        log: Log,
        duty: u16,
        reject_above: u32,
    }

    impl PwmPin for MockPwm {
        type Duty = u16;

        fn disable(&mut self) {
            self.log.borrow_mut().push(Event::Disable);
        }

        fn enable(&mut self) {
            self.log.borrow_mut().push(Event::Enable);
        }

        fn get_duty(&self) -> u16 {
            self.duty
        }

        fn get_max_duty(&self) -> u16 {
            u16::MAX
        }

        fn set_duty(&mut self, duty: u16) {
            self.duty = duty;
            self.log.borrow_mut().push(Event::Duty(duty));
        }
    }

    impl SetFrequency for MockPwm {
        type Error = u32;

        fn set_frequency(&mut self, hz: u32) -> Result<(), u32> {
            if hz > self.reject_above {
                return Err(hz);
            }
            self.log.borrow_mut().push(Event::Frequency(hz));
            Ok(())
        }
    }

    struct TrackingDelay(Log);

    impl DelayMs<u32> for TrackingDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.0.borrow_mut().push(Event::Delay(ms));
        }
    }

    fn buzzer() -> (Buzzer<MockPwm, TrackingDelay>, Log) {
        let log = Log::default();
        let pwm = MockPwm {
            log: log.clone(),
            duty: 1234,
            reject_above: 10_000,
        };
        let buzzer = Buzzer::new(pwm, TrackingDelay(log.clone()));
        (buzzer, log)
    }

    #[test]
    fn starts_silent() {
        let (buzzer, log) = buzzer();
        assert_eq!(*log.borrow(), vec![Event::Duty(0), Event::Enable]);
        assert_eq!(buzzer.pwm.get_duty(), 0);
    }

    #[test]
    fn tone_sets_duty_waits_and_stops() {
        let (mut buzzer, log) = buzzer();
        log.borrow_mut().clear();

        buzzer.tone(440, 50, 100).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                Event::Frequency(440),
                Event::Duty(u16::MAX / 2),
                Event::Delay(100),
                Event::Duty(0),
            ]
        );
    }

    #[test]
    fn duty_above_full_is_capped() {
        let (mut buzzer, log) = buzzer();
        buzzer.tone(440, 250, 5).unwrap();
        assert!(log.borrow().contains(&Event::Duty(u16::MAX)));
    }

    #[test]
    fn rest_only_waits() {
        let (mut buzzer, log) = buzzer();
        log.borrow_mut().clear();
        buzzer.tone(0, 50, 40).unwrap();
        assert_eq!(*log.borrow(), vec![Event::Delay(40)]);
    }

    #[test]
    fn rejected_frequency_stays_silent() {
        let (mut buzzer, log) = buzzer();
        log.borrow_mut().clear();
        assert_eq!(buzzer.tone(20_000, 50, 100), Err(20_000));
        assert!(log.borrow().is_empty());
        assert_eq!(buzzer.pwm.get_duty(), 0);
    }

    #[test]
    fn cue_plays_every_note_in_order() {
        let (mut buzzer, log) = buzzer();
        log.borrow_mut().clear();
        buzzer.play(FIX_LOST).unwrap();

        let played: Vec<Event> = log
            .borrow()
            .iter()
            .copied()
            .filter(|e| matches!(e, Event::Frequency(_) | Event::Delay(_)))
            .collect();
        assert_eq!(
            played,
            vec![
                Event::Frequency(660),
                Event::Delay(120),
                Event::Delay(40),
                Event::Frequency(440),
                Event::Delay(200),
            ]
        );
        assert_eq!(log.borrow().last(), Some(&Event::Duty(0)));
    }

    #[test]
    fn release_disables_the_channel() {
        let (buzzer, log) = buzzer();
        let (pwm, _delay) = buzzer.release();
        assert_eq!(log.borrow().last(), Some(&Event::Disable));
        assert_eq!(pwm.get_duty(), 0);
    }
}
