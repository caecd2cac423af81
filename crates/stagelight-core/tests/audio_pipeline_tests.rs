use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use stagelight_core::audio::AudioSettings;
use stagelight_core::{
    AudioFeatureExtractor, CaptureSource, CaptureTask, Clock, EngineContext, FrameScheduler,
    ManualClock,
};

struct ScriptedSource {
    blocks: Arc<Mutex<VecDeque<Vec<i16>>>>,
    clock: ManualClock,
}

impl CaptureSource for ScriptedSource {
    fn read_block(&mut self) -> Option<Vec<i16>> {
        self.blocks.lock().pop_front()
    }

    fn last_heartbeat(&self) -> f64 {
        self.clock.now()
    }

    fn restart(&mut self) -> stagelight_core::Result<()> {
        Ok(())
    }
}

fn tone(len: usize, rate: u32) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (16000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}

fn rig(clock: &ManualClock, blocks: &Arc<Mutex<VecDeque<Vec<i16>>>>) -> FrameScheduler {
    let settings = AudioSettings::default();
    let mut scheduler = FrameScheduler::new(EngineContext::new(Arc::new(clock.clone())), 60);
    scheduler.add_task(Box::new(CaptureTask::new(
        Box::new(ScriptedSource {
            blocks: blocks.clone(),
            clock: clock.clone(),
        }),
        0.5,
    )));
    scheduler.add_task(Box::new(AudioFeatureExtractor::new(&settings)));
    scheduler
}

#[test]
fn test_dead_timer_grows_during_silence_and_clears_on_sound() {
    let settings = AudioSettings::default();
    let block_len = settings.samples_per_frame();
    let clock = ManualClock::new(100.0);
    let blocks = Arc::new(Mutex::new(VecDeque::new()));
    let mut scheduler = rig(&clock, &blocks);
    scheduler.start().unwrap();

    let mut dead = Vec::new();
    for _ in 0..5 {
        blocks.lock().push_back(vec![0; block_len]);
        clock.advance(0.1);
        scheduler.tick();
        dead.push(scheduler.context().frame.dead_for);
    }
    assert!(dead.iter().all(Option::is_some));
    for pair in dead.windows(2) {
        assert!(pair[1] > pair[0], "{:?}", dead);
    }

    blocks.lock().push_back(tone(block_len, settings.mic_rate));
    clock.advance(0.1);
    scheduler.tick();
    let frame = &scheduler.context().frame;
    assert_eq!(frame.dead_for, None);
    assert!(frame.audio_v_sum.unwrap() > 0.0);
}

#[test]
fn test_missing_block_skips_every_stage() {
    let clock = ManualClock::new(0.0);
    let blocks = Arc::new(Mutex::new(VecDeque::new()));
    let mut scheduler = rig(&clock, &blocks);
    scheduler.start().unwrap();

    clock.advance(0.1);
    scheduler.tick();
    let frame = &scheduler.context().frame;
    assert!(frame.raw_audio.is_none());
    assert!(frame.audio.is_none());
    assert!(frame.is_beat.is_none());
    assert!(frame.idle_for.is_none());
}
