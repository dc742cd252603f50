use std::time::Duration;

use crate::config::{LowFpsAction, SimulationConfig};

/// Notice raised when a spawn is refused for lack of frame budget.
pub const LOW_FPS_NOTICE: &str = "Boid not created, FPS too low !";

/// Population figures handed to an admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Census {
    pub boids: usize,
    pub predators: usize,
    /// A paused world bypasses the post-refusal cool-down.
    pub paused: bool,
}

/// Number of oldest agents per role the world should cull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadShed {
    pub boids: usize,
    pub predators: usize,
}

impl LoadShed {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.boids == 0 && self.predators == 0
    }
}

/// Verdict for a single spawn request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Refuse quietly; a recent refusal is still cooling down.
    Throttle,
    /// Refuse, raise a notice, and cull the given number of agents.
    Refuse(LoadShed),
}

/// Gatekeeper consulted before any agent is created.
pub trait AdmissionPolicy: Send {
    fn admit(&mut self, census: Census) -> Admission;

    /// Feed the wall-clock duration of the last rendered frame.
    fn record_frame(&mut self, _elapsed: Duration) {}

    /// User-facing notice describing the last refusal, while it is still relevant.
    fn notice(&self) -> Option<&str> {
        None
    }
}

/// Policy that admits every spawn.
#[derive(Debug, Default)]
pub struct AlwaysAdmit;

impl AdmissionPolicy for AlwaysAdmit {
    fn admit(&mut self, _census: Census) -> Admission {
        Admission::Admit
    }
}

/// Refuses spawns while the measured frame rate sits below a floor.
///
/// Frame durations are averaged into an estimate every `update_interval`.
/// A refusal raises [`LOW_FPS_NOTICE`], starts a cool-down of `fade_intervals`
/// estimates during which further spawns are throttled, and asks the world to
/// shed load according to the configured [`LowFpsAction`].
#[derive(Debug, Clone)]
pub struct FrameRateGovernor {
    min_fps: f32,
    update_interval: Duration,
    fade_intervals: u32,
    action: LowFpsAction,
    fps: Option<f32>,
    samples: Vec<f32>,
    since_update: Duration,
    fade: u32,
    notice: Option<&'static str>,
}

impl FrameRateGovernor {
    #[must_use]
    pub fn new(min_fps: f32, action: LowFpsAction) -> Self {
        Self {
            min_fps,
            update_interval: Duration::from_millis(100),
            fade_intervals: 50,
            action,
            fps: None,
            samples: Vec::new(),
            since_update: Duration::ZERO,
            fade: 0,
            notice: None,
        }
    }

    /// Build a governor from the frame-rate fields of a world configuration.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.min_fps, config.low_fps_action)
            .with_update_interval(Duration::from_millis(config.fps_update_interval_ms))
            .with_fade_intervals(config.notice_fade_intervals)
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    #[must_use]
    pub fn with_fade_intervals(mut self, intervals: u32) -> Self {
        self.fade_intervals = intervals;
        self
    }

    /// Latest frame-rate estimate; `None` until the first interval completes.
    #[must_use]
    pub const fn fps(&self) -> Option<f32> {
        self.fps
    }

    fn healthy(&self) -> bool {
        self.fps.is_none_or(|fps| fps >= self.min_fps)
    }

    fn shed_for(&self, census: Census) -> LoadShed {
        match self.action {
            LowFpsAction::PopulationControl => {
                if census.boids < census.predators * 5 {
                    LoadShed {
                        boids: 0,
                        predators: census.predators * 5 / 100,
                    }
                } else {
                    LoadShed {
                        boids: census.boids * 5 / 100,
                        predators: 0,
                    }
                }
            }
            LowFpsAction::BudgetCuts => LoadShed {
                boids: census.boids / 2,
                predators: census.predators / 2,
            },
        }
    }
}

impl AdmissionPolicy for FrameRateGovernor {
    fn admit(&mut self, census: Census) -> Admission {
        if self.fade > 0 && !census.paused {
            return Admission::Throttle;
        }
        if self.healthy() {
            return Admission::Admit;
        }
        self.notice = Some(LOW_FPS_NOTICE);
        self.fade = self.fade_intervals;
        Admission::Refuse(self.shed_for(census))
    }

    fn record_frame(&mut self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f32();
        if seconds > 0.0 {
            self.samples.push(1.0 / seconds);
        }
        self.since_update += elapsed;
        if self.since_update <= self.update_interval {
            return;
        }

        let average = if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f32>() / self.samples.len() as f32
        };
        self.fps = Some(average.round());
        self.fade = self.fade.saturating_sub(1);
        if self.fade == 0 && self.healthy() {
            self.notice = None;
        }
        self.samples.clear();
        self.since_update = Duration::ZERO;
    }

    fn notice(&self) -> Option<&str> {
        self.notice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn census(boids: usize, predators: usize) -> Census {
        Census {
            boids,
            predators,
            paused: false,
        }
    }

    fn feed(governor: &mut FrameRateGovernor, frame_ms: u64, frames: usize) {
        for _ in 0..frames {
            governor.record_frame(Duration::from_millis(frame_ms));
        }
    }

    #[test]
    fn admits_until_first_estimate() {
        let mut governor = FrameRateGovernor::new(20.0, LowFpsAction::PopulationControl);
        assert_eq!(governor.admit(census(10, 1)), Admission::Admit);
        assert_eq!(governor.fps(), None);
        assert!(governor.notice().is_none());
    }

    #[test]
    fn low_frame_rate_refuses_then_throttles() {
        let mut governor = FrameRateGovernor::new(20.0, LowFpsAction::PopulationControl)
            .with_fade_intervals(3);
        // 100 ms frames: 10 fps.
        feed(&mut governor, 100, 2);
        assert_eq!(governor.fps(), Some(10.0));

        let verdict = governor.admit(census(200, 4));
        assert_eq!(
            verdict,
            Admission::Refuse(LoadShed {
                boids: 10,
                predators: 0
            })
        );
        assert_eq!(governor.notice(), Some(LOW_FPS_NOTICE));
        assert_eq!(governor.admit(census(200, 4)), Admission::Throttle);

        let paused = Census {
            paused: true,
            ..census(200, 4)
        };
        assert!(matches!(governor.admit(paused), Admission::Refuse(_)));
    }

    #[test]
    fn notice_clears_after_fade_and_recovery() {
        let mut governor = FrameRateGovernor::new(20.0, LowFpsAction::BudgetCuts)
            .with_fade_intervals(2);
        feed(&mut governor, 100, 2);
        assert_eq!(
            governor.admit(census(10, 4)),
            Admission::Refuse(LoadShed {
                boids: 5,
                predators: 2
            })
        );

        // 10 ms frames: 100 fps; eleven of them complete one interval.
        feed(&mut governor, 10, 11);
        assert_eq!(governor.fps(), Some(100.0));
        assert!(governor.notice().is_some(), "one fade interval left");
        assert_eq!(governor.admit(census(10, 4)), Admission::Throttle);

        feed(&mut governor, 10, 11);
        assert!(governor.notice().is_none());
        assert_eq!(governor.admit(census(10, 4)), Admission::Admit);
    }

    #[test]
    fn predator_heavy_world_sheds_predators() {
        let mut governor = FrameRateGovernor::new(1_000.0, LowFpsAction::PopulationControl);
        feed(&mut governor, 100, 2);
        assert_eq!(
            governor.admit(census(50, 40)),
            Admission::Refuse(LoadShed {
                boids: 0,
                predators: 2
            })
        );
    }

    #[test]
    fn always_admit_never_refuses() {
        let mut policy = AlwaysAdmit;
        policy.record_frame(Duration::from_secs(5));
        assert_eq!(policy.admit(census(1_000_000, 0)), Admission::Admit);
        assert!(policy.notice().is_none());
    }
}
