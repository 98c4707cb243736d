//! Sequential fade: the outgoing slot fades to black, the incoming one fades in.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadePhase {
    FadeOut,
    Swap, // First step after the outgoing half finished
    FadeIn,
}

/// Where a transition stands at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeState {
    pub phase: FadePhase,
    pub progress: f32,
    pub started: Instant,
}

/// What to put on screen for one step of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct FadeStep<T> {
    pub state: FadeState,
    /// `None` shows black.
    pub showing: Option<T>,
    pub opacity: f32,
    pub done: bool,
}

/// Linear ramp of `elapsed` over `span`, clamped to `[0, 1]`. A zero-length
/// span is already complete.
pub fn ramp(elapsed: Duration, span: Duration) -> f32 {
    if span.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f32() / span.as_secs_f32()).clamp(0.0, 1.0)
}

/// A single in-flight fade between two optional slots. `None` is the blank
/// screen; fading from or to blank skips the black half.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    from: Option<T>,
    to: Option<T>,
    fade_out: Duration,
    fade_in: Duration,
    fade_in_full: Duration,
    started: Instant,
    swapped: bool,
}

impl<T: Clone> Transition<T> {
    pub fn new(from: Option<T>, to: Option<T>, fade_out: Duration, fade_in: Duration, now: Instant) -> Self {
        Self {
            fade_out: if from.is_some() { fade_out } else { Duration::ZERO },
            fade_in: if to.is_some() { fade_in } else { Duration::ZERO },
            fade_in_full: fade_in,
            from,
            to,
            started: now,
            swapped: false,
        }
    }

    pub fn target(&self) -> Option<&T> {
        self.to.as_ref()
    }

    /// Instant after which only the terminal slot is shown.
    pub fn deadline(&self) -> Instant {
        self.started + self.fade_out + self.fade_in
    }

    pub fn state(&self, now: Instant) -> FadeState {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.fade_out {
            FadeState {
                phase: FadePhase::FadeOut,
                progress: ramp(elapsed, self.fade_out),
                started: self.started,
            }
        } else {
            FadeState {
                phase: if self.swapped { FadePhase::FadeIn } else { FadePhase::Swap },
                progress: ramp(elapsed - self.fade_out, self.fade_in),
                started: self.started,
            }
        }
    }

    /// Opacity and slot for `now`. Past the deadline the target is shown at
    /// full opacity and the step is `done`, however late the call comes.
    pub fn step(&mut self, now: Instant) -> FadeStep<T> {
        let state = self.state(now);
        if now >= self.deadline() {
            self.swapped = true;
            return FadeStep {
                state: FadeState {
                    phase: FadePhase::FadeIn,
                    progress: 1.0,
                    started: self.started,
                },
                showing: self.to.clone(),
                opacity: 1.0,
                done: true,
            };
        }
        match state.phase {
            FadePhase::FadeOut => FadeStep {
                state,
                showing: self.from.clone(),
                opacity: 1.0 - state.progress,
                done: false,
            },
            FadePhase::Swap | FadePhase::FadeIn => {
                self.swapped = true;
                FadeStep {
                    state,
                    showing: self.to.clone(),
                    opacity: state.progress,
                    done: false,
                }
            }
        }
    }

    /// Point the transition at a new target without starting a second fade.
    /// While fading out only the target changes; while fading in the
    /// half-shown slot fades back out from its current opacity.
    pub fn retarget(&mut self, to: Option<T>, now: Instant) {
        let state = self.state(now);
        if state.phase == FadePhase::FadeOut {
            self.fade_in = if to.is_some() { self.fade_in_full } else { Duration::ZERO };
            self.to = to;
            return;
        }

        let opacity = if now >= self.deadline() { 1.0 } else { state.progress };
        let from = self.to.take();
        let fade_out = if from.is_some() { self.fade_in_full } else { Duration::ZERO };
        let already_out = fade_out.mul_f32(1.0 - opacity);
        *self = Transition::new(from, to, fade_out, self.fade_in_full, now);
        self.started = now.checked_sub(already_out).unwrap_or(now);
    }

    /// Abandon the fade and return the slot it was heading to.
    pub fn abort(self) -> Option<T> {
        self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_ramp_clamps() {
        assert_eq!(ramp(ms(0), ms(500)), 0.0);
        assert_eq!(ramp(ms(250), ms(500)), 0.5);
        assert_eq!(ramp(ms(900), ms(500)), 1.0);
        assert_eq!(ramp(ms(0), Duration::ZERO), 1.0);
    }

    #[test]
    fn test_sequential_fade() {
        let t0 = Instant::now();
        let mut t = Transition::new(Some('a'), Some('b'), ms(500), ms(500), t0);

        let step = t.step(t0 + ms(250));
        assert_eq!(step.state.phase, FadePhase::FadeOut);
        assert_eq!(step.showing, Some('a'));
        assert!((step.opacity - 0.5).abs() < 1e-4);

        let step = t.step(t0 + ms(500));
        assert_eq!(step.state.phase, FadePhase::Swap);
        assert_eq!(step.showing, Some('b'));
        assert!(step.opacity.abs() < 1e-4);

        let step = t.step(t0 + ms(750));
        assert_eq!(step.state.phase, FadePhase::FadeIn);
        assert!((step.opacity - 0.5).abs() < 1e-4);
        assert!(!step.done);

        let step = t.step(t0 + ms(1000));
        assert!(step.done);
        assert_eq!(step.opacity, 1.0);
    }

    #[test]
    fn test_late_step_lands_on_terminal_frame() {
        let t0 = Instant::now();
        let mut t = Transition::new(Some('a'), Some('b'), ms(500), ms(500), t0);
        let step = t.step(t0 + Duration::from_secs(30));
        assert!(step.done);
        assert_eq!(step.showing, Some('b'));
        assert_eq!(step.opacity, 1.0);
    }

    #[test]
    fn test_blank_ends_skip_black_half() {
        let t0 = Instant::now();
        let t = Transition::new(None, Some('b'), ms(500), ms(500), t0);
        assert_eq!(t.deadline(), t0 + ms(500));
        assert_eq!(t.state(t0).phase, FadePhase::Swap);

        let t = Transition::<char>::new(Some('a'), None, ms(2000), ms(500), t0);
        assert_eq!(t.deadline(), t0 + ms(2000));
    }

    #[test]
    fn test_retarget_during_fade_out_keeps_timing() {
        let t0 = Instant::now();
        let mut t = Transition::new(Some('a'), Some('b'), ms(500), ms(500), t0);
        t.retarget(Some('c'), t0 + ms(100));
        assert_eq!(t.target(), Some(&'c'));
        assert_eq!(t.deadline(), t0 + ms(1000));
    }

    #[test]
    fn test_retarget_during_fade_in_fades_back_out() {
        let t0 = Instant::now();
        let mut t = Transition::new(Some('a'), Some('b'), ms(500), ms(500), t0);
        let now = t0 + ms(750);
        t.step(now);
        t.retarget(Some('c'), now);

        // 'b' was at half opacity; it continues from there towards black.
        let step = t.step(now);
        assert_eq!(step.showing, Some('b'));
        assert!((step.opacity - 0.5).abs() < 1e-3);
        let step = t.step(now + ms(250));
        assert_eq!(step.showing, Some('c'));
        assert!(t.step(now + ms(750)).done);
    }

    #[test]
    fn test_abort_returns_target() {
        let t = Transition::new(Some('a'), Some('b'), ms(500), ms(500), Instant::now());
        assert_eq!(t.abort(), Some('b'));
    }
}
