use log::{info, warn};

use crate::types::{ColorSetting, Rgb, SensorSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    Unchanged,
    Entered,
    Cleared,
}

/// Over-temperature alert with a blinking indicator. While active the alert
/// owns the indicator; manual colour changes wait until it clears.
#[derive(Debug, Clone)]
pub struct AlertController {
    threshold_c: f32,
    alert_color: ColorSetting,
    blink_interval_ms: u64,

    active: bool,
    blink_on: bool,
    last_toggle_ms: u64,
}

impl AlertController {
    pub fn new(threshold_c: f32, alert_color: ColorSetting, blink_interval_ms: u64) -> Self {
        Self {
            threshold_c,
            alert_color,
            blink_interval_ms,
            active: false,
            blink_on: false,
            last_toggle_ms: 0,
        }
    }

    pub fn threshold_c(&self) -> f32 {
        self.threshold_c
    }

    pub fn alert_color(&self) -> &ColorSetting {
        &self.alert_color
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_blinking(&self) -> bool {
        self.active
    }

    pub fn is_blink_on(&self) -> bool {
        self.blink_on
    }

    pub fn set_threshold(&mut self, threshold_c: f32) {
        self.threshold_c = threshold_c;
    }

    pub fn set_alert_color(&mut self, alert_color: ColorSetting) {
        self.alert_color = alert_color;
    }

    /// Recomputes `active` from the snapshot. An invalid reading counts as no
    /// alert.
    pub fn evaluate(&mut self, snapshot: &SensorSnapshot, now_ms: u64) -> AlertTransition {
        let over = snapshot
            .usable_temperature()
            .is_some_and(|temperature_c| temperature_c > self.threshold_c);

        match (self.active, over) {
            (false, true) => {
                warn!(
                    "temperature alert: {:.1}C above threshold {:.1}C",
                    snapshot.temperature_c, self.threshold_c
                );
                self.active = true;
                self.blink_on = true;
                self.last_toggle_ms = now_ms;
                AlertTransition::Entered
            }
            (true, false) => {
                info!("temperature alert cleared");
                self.active = false;
                self.blink_on = false;
                AlertTransition::Cleared
            }
            _ => AlertTransition::Unchanged,
        }
    }

    /// Advances the blink phase. Returns the colour to render when the phase
    /// flipped, `None` otherwise.
    pub fn blink(&mut self, now_ms: u64) -> Option<Rgb> {
        if !self.active {
            return None;
        }
        if now_ms.saturating_sub(self.last_toggle_ms) < self.blink_interval_ms {
            return None;
        }
        self.blink_on = !self.blink_on;
        self.last_toggle_ms = now_ms;
        Some(self.phase_color())
    }

    /// What the indicator should show, given the colour it would rest at
    /// without an alert.
    pub fn indicator_color(&self, resting: Rgb) -> Rgb {
        if self.active {
            self.phase_color()
        } else {
            resting
        }
    }

    fn phase_color(&self) -> Rgb {
        if self.blink_on {
            self.alert_color.rgb
        } else {
            Rgb::OFF
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ALERT_COLOR, DEFAULT_TEMP_THRESHOLD_C};
    use pretty_assertions::assert_eq;

    fn controller() -> AlertController {
        AlertController::new(
            DEFAULT_TEMP_THRESHOLD_C,
            ColorSetting::from_rgb(DEFAULT_ALERT_COLOR),
            500,
        )
    }

    fn reading(temperature_c: f32) -> SensorSnapshot {
        SensorSnapshot {
            temperature_c,
            humidity_pct: 40.0,
            valid: true,
            ..SensorSnapshot::default()
        }
    }

    #[test]
    fn activates_strictly_above_threshold() {
        let mut alert = controller();
        assert_eq!(alert.evaluate(&reading(31.0), 0), AlertTransition::Entered);
        assert!(alert.is_active());
        assert!(alert.is_blink_on());

        let mut alert = controller();
        assert_eq!(alert.evaluate(&reading(29.0), 0), AlertTransition::Unchanged);
        assert!(!alert.is_active());

        assert_eq!(alert.evaluate(&reading(30.0), 0), AlertTransition::Unchanged);
        assert!(!alert.is_active());
    }

    #[test]
    fn invalid_snapshot_clears_alert() {
        let mut alert = controller();
        alert.evaluate(&reading(35.0), 0);

        let mut stale = reading(35.0);
        stale.valid = false;
        assert_eq!(alert.evaluate(&stale, 100), AlertTransition::Cleared);
        assert!(!alert.is_active());
        assert!(!alert.is_blinking());
    }

    #[test]
    fn clearing_restores_resting_colour_mid_blink() {
        let mut alert = controller();
        let saved = Rgb::new(0, 255, 0);
        alert.evaluate(&reading(35.0), 0);
        alert.blink(500);
        assert_eq!(alert.indicator_color(saved), Rgb::OFF);

        alert.evaluate(&reading(20.0), 550);
        assert_eq!(alert.indicator_color(saved), saved);
    }

    #[test]
    fn blink_toggles_every_interval_while_active() {
        let mut alert = controller();
        alert.evaluate(&reading(35.0), 1_000);

        let mut flips = Vec::new();
        for now in (1_000..=3_000).step_by(100) {
            if let Some(color) = alert.blink(now) {
                flips.push((now, color));
            }
        }
        let times: Vec<u64> = flips.iter().map(|(now, _)| *now).collect();
        assert_eq!(times, vec![1_500, 2_000, 2_500, 3_000]);
        assert_eq!(flips[0].1, Rgb::OFF);
        assert_eq!(flips[1].1, DEFAULT_ALERT_COLOR);
    }

    #[test]
    fn blink_flips_within_any_600ms_window() {
        let mut alert = controller();
        alert.evaluate(&reading(40.0), 0);
        let mut last_flip = 0;
        for now in (0..5_000).step_by(100) {
            if alert.blink(now).is_some() {
                assert!(now - last_flip <= 600);
                last_flip = now;
            }
        }
    }

    #[test]
    fn no_blink_while_inactive() {
        let mut alert = controller();
        for now in (0..2_000).step_by(100) {
            assert_eq!(alert.blink(now), None);
        }
        assert!(!alert.is_blink_on());
    }

    #[test]
    fn lowering_threshold_activates_on_next_evaluation() {
        let mut alert = controller();
        let snapshot = reading(27.0);
        alert.evaluate(&snapshot, 0);
        assert!(!alert.is_active());

        alert.set_threshold(25.0);
        assert_eq!(alert.evaluate(&snapshot, 100), AlertTransition::Entered);
    }

    #[test]
    fn new_alert_colour_shows_on_phase_on() {
        let mut alert = controller();
        alert.evaluate(&reading(35.0), 0);
        alert.set_alert_color(ColorSetting::from_rgb(Rgb::new(0, 0, 255)));
        assert_eq!(alert.indicator_color(Rgb::OFF), Rgb::new(0, 0, 255));
    }
}
