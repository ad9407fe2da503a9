use crate::types::KillerPhase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillerTick {
    Idle,
    Charging,
    Charged,
    Cooling,
    CooldownEnded,
}

#[derive(Clone, Debug)]
pub struct KillerMachine {
    phase: KillerPhase,
}

impl Default for KillerMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl KillerMachine {
    pub fn new() -> Self {
        Self {
            phase: KillerPhase::Idle,
        }
    }

    pub fn phase(&self) -> KillerPhase {
        self.phase
    }

    pub fn press(&mut self, hold_duration: u32) -> bool {
        if self.phase != KillerPhase::Idle {
            return false;
        }
        self.phase = KillerPhase::Active {
            hold_remaining: hold_duration,
        };
        true
    }

    // Early release cancels the charge outright: no bonus, no cooldown.
    pub fn release(&mut self) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.phase = KillerPhase::Idle;
        true
    }

    pub fn tick(&mut self, cooldown_duration: u32, cooldown_after_bonus: bool) -> KillerTick {
        match self.phase {
            KillerPhase::Idle => KillerTick::Idle,
            KillerPhase::Active { hold_remaining } if hold_remaining <= 1 => {
                self.phase = if cooldown_after_bonus {
                    KillerPhase::Cooldown {
                        cooldown_remaining: cooldown_duration,
                    }
                } else {
                    KillerPhase::Idle
                };
                KillerTick::Charged
            }
            KillerPhase::Active { hold_remaining } => {
                self.phase = KillerPhase::Active {
                    hold_remaining: hold_remaining - 1,
                };
                KillerTick::Charging
            }
            KillerPhase::Cooldown { cooldown_remaining } if cooldown_remaining <= 1 => {
                self.phase = KillerPhase::Idle;
                KillerTick::CooldownEnded
            }
            KillerPhase::Cooldown { cooldown_remaining } => {
                self.phase = KillerPhase::Cooldown {
                    cooldown_remaining: cooldown_remaining - 1,
                };
                KillerTick::Cooling
            }
        }
    }

    pub fn reset(&mut self) {
        self.phase = KillerPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_runs_down_then_enters_cooldown() {
        let mut killer = KillerMachine::new();
        assert!(killer.press(3));
        assert_eq!(killer.tick(20, true), KillerTick::Charging);
        assert_eq!(killer.tick(20, true), KillerTick::Charging);
        assert_eq!(killer.phase(), KillerPhase::Active { hold_remaining: 1 });
        assert_eq!(killer.tick(20, true), KillerTick::Charged);
        assert_eq!(
            killer.phase(),
            KillerPhase::Cooldown {
                cooldown_remaining: 20
            }
        );
    }

    #[test]
    fn charged_without_cooldown_returns_to_idle() {
        let mut killer = KillerMachine::new();
        assert!(killer.press(1));
        assert_eq!(killer.tick(20, false), KillerTick::Charged);
        assert_eq!(killer.phase(), KillerPhase::Idle);
    }

    #[test]
    fn press_is_refused_outside_idle() {
        let mut killer = KillerMachine::new();
        assert!(killer.press(5));
        assert!(!killer.press(5));
        assert_eq!(killer.phase(), KillerPhase::Active { hold_remaining: 5 });

        let mut cooling = KillerMachine::new();
        cooling.press(1);
        cooling.tick(2, true);
        assert!(!cooling.press(5));
        assert!(!cooling.release());
        assert!(cooling.phase().is_cooldown());
    }

    #[test]
    fn cooldown_counts_down_to_idle() {
        let mut killer = KillerMachine::new();
        killer.press(1);
        killer.tick(2, true);
        assert_eq!(killer.tick(2, true), KillerTick::Cooling);
        assert_eq!(killer.tick(2, true), KillerTick::CooldownEnded);
        assert_eq!(killer.phase(), KillerPhase::Idle);
        assert_eq!(killer.tick(2, true), KillerTick::Idle);
    }

    #[test]
    fn early_release_cancels_and_next_press_starts_full() {
        let mut killer = KillerMachine::new();
        killer.press(5);
        killer.tick(20, true);
        killer.tick(20, true);
        assert!(killer.release());
        assert_eq!(killer.phase(), KillerPhase::Idle);
        assert!(killer.press(5));
        assert_eq!(killer.phase(), KillerPhase::Active { hold_remaining: 5 });
    }
}
