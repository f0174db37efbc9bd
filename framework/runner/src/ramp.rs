use crate::config::Stage;
use std::time::Duration;

/// The number of virtual users a `ramping-vus` scenario should be running `elapsed` after it
/// started, or `None` once every stage has completed.
///
/// Within a stage the target moves linearly from the previous stage's target (or `start_vus` for
/// the first stage) to the stage's own target. The value is rounded to the nearest whole VU and
/// never leaves the range between those two targets.
pub fn ramping_target(start_vus: u64, stages: &[Stage], elapsed: Duration) -> Option<u64> {
    let mut from = start_vus;
    let mut stage_start = Duration::ZERO;

    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
            let interpolated = from as f64 + (stage.target as f64 - from as f64) * progress;

            let (low, high) = if from <= stage.target {
                (from, stage.target)
            } else {
                (stage.target, from)
            };
            return Some((interpolated.round() as u64).clamp(low, high));
        }

        from = stage.target;
        stage_start = stage_end;
    }

    None
}
