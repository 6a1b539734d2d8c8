use soundman::*;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct PlayLog {
    ticks: usize,
    commits: Vec<(i64, i64, usize)>,
    dropped: bool,
}

type Logs = Arc<Mutex<Vec<Arc<Mutex<PlayLog>>>>>;

/// PcmSound wrapper that records what the manager does to it. Copies get
/// their own log, appended to the shared `copies` list.
struct RecordingSound {
    inner: PcmSound,
    log: Arc<Mutex<PlayLog>>,
    copies: Logs,
}

impl RecordingSound {
    fn new(frames: usize) -> (Self, Arc<Mutex<PlayLog>>, Logs) {
        let log = Arc::new(Mutex::new(PlayLog::default()));
        let copies: Logs = Arc::default();
        let sound = Self {
            inner: PcmSound::new(vec![1000i16; frames], 1, 1000).unwrap(),
            log: log.clone(),
            copies: copies.clone(),
        };
        (sound, log, copies)
    }
}

impl Drop for RecordingSound {
    fn drop(&mut self) {
        self.log.lock().unwrap().dropped = true;
    }
}

impl Sound for RecordingSound {
    fn is_playing(&self) -> bool {
        self.inner.is_playing()
    }

    fn start(&mut self) {
        self.inner.start();
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn params(&self) -> &SoundParams {
        self.inner.params()
    }

    fn set_params(&mut self, params: SoundParams) {
        self.inner.set_params(params);
    }

    fn set_position_seconds(&mut self, seconds: f32) {
        self.inner.set_position_seconds(seconds);
    }

    fn update(&mut self, _delta: f32) {
        self.log.lock().unwrap().ticks += 1;
    }

    fn commit_playing_position(&mut self, frame: i64, position: i64, got_frames: usize) {
        self.log
            .lock()
            .unwrap()
            .commits
            .push((frame, position, got_frames));
        self.inner
            .commit_playing_position(frame, position, got_frames);
    }

    fn position_at(&self, frame: i64) -> Option<i64> {
        self.inner.position_at(frame)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn duplicate(&self) -> Box<dyn Sound> {
        let log = Arc::new(Mutex::new(PlayLog::default()));
        self.copies.lock().unwrap().push(log.clone());
        let inner = PcmSound::new(vec![1000i16; self.inner.total_frames()], 1, 1000).unwrap();
        Box::new(Self {
            inner,
            log,
            copies: self.copies.clone(),
        })
    }

    fn read_frames(&mut self, out: &mut [i16], channels: u16) -> (i64, usize) {
        self.inner.read_frames(out, channels)
    }
}

fn desc() -> SoundManagerDesc {
    SoundManagerDesc::default()
        .sample_rate(1000)
        .channels(1)
        .block_size(10)
}

fn null_manager() -> SoundManager {
    let _ = env_logger::builder().is_test(true).try_init();
    SoundManager::new(desc(), |ctx| Ok(Box::new(NullDriver::new(ctx)))).unwrap()
}

#[test]
fn test_playing_a_busy_sound_plays_a_copy() {
    let manager = null_manager();
    let (recorder, _log, copies) = RecordingSound::new(1000);
    let sound = manager.register(Box::new(recorder));

    let first = manager.play(&sound, None).unwrap();
    let second = manager.play(&sound, None).unwrap();

    assert_eq!(first, sound);
    assert_ne!(first.id(), second.id());
    assert_eq!(second.original(), first.original());
    assert!(second.is_copy());
    assert_eq!(copies.lock().unwrap().len(), 1);
    assert_eq!(manager.owned_count(), 1);
    assert_eq!(manager.copies_of(&second).len(), 2);

    manager.stop_all_copies_of(&second);
    assert!(!first.lock().is_playing());
    assert!(!second.lock().is_playing());
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(manager.pending_delete_count(), 1);

    manager.update(0.0);
    assert_eq!(manager.pending_delete_count(), 0);
    assert!(manager.is_registered(&first));
    assert!(!manager.is_registered(&second));
}

#[test]
fn test_copy_of_a_copy_shares_the_original() {
    let manager = null_manager();
    let (recorder, _log, _copies) = RecordingSound::new(1000);
    let sound = manager.register(Box::new(recorder));

    manager.play(&sound, None).unwrap();
    let copy = manager.play(&sound, None).unwrap();
    let copy_of_copy = manager.play(&copy, None).unwrap();

    assert_eq!(copy_of_copy.original(), sound.id());
    manager.stop_all_copies_of(&sound);
    assert!(!copy_of_copy.lock().is_playing());
}

#[test]
fn test_stop_all_copies_leaves_other_sounds_alone() {
    let manager = null_manager();
    let (a, _, _) = RecordingSound::new(1000);
    let (b, _, _) = RecordingSound::new(1000);
    let a = manager.register(Box::new(a));
    let b = manager.register(Box::new(b));
    manager.play(&a, None).unwrap();
    manager.play(&b, None).unwrap();

    manager.stop_all_copies_of(&a);
    assert!(!a.lock().is_playing());
    assert!(b.lock().is_playing());
}

#[test]
fn test_reports_reach_their_own_sound_exactly_once() {
    let manager = null_manager();
    let (a, log_a, _) = RecordingSound::new(100);
    let (b, log_b, _) = RecordingSound::new(100);
    let a = manager.register(Box::new(a));
    let b = manager.register(Box::new(b));
    manager.play(&a, None).unwrap();
    manager.play(&b, Some(SoundParams::default().start_second(0.02)))
        .unwrap();

    manager.update(0.05);
    assert!(log_a.lock().unwrap().commits.is_empty());
    manager.update(0.0);
    manager.update(0.0);

    let expected_a: Vec<_> = (0..5).map(|i| (i * 10, i * 10, 10)).collect();
    let expected_b: Vec<_> = (0..5).map(|i| (i * 10, 20 + i * 10, 10)).collect();
    assert_eq!(log_a.lock().unwrap().commits, expected_a);
    assert_eq!(log_b.lock().unwrap().commits, expected_b);
}

#[test]
fn test_stale_reports_are_ignored() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut sink = None;
    let manager = SoundManager::new(desc(), |ctx| {
        sink = Some(ctx.reports.clone());
        Ok(Box::new(NullDriver::new(ctx)))
    })
    .unwrap();
    let sink = sink.unwrap();

    let (a, log_a, _) = RecordingSound::new(100);
    let (b, log_b, _) = RecordingSound::new(100);
    let a = manager.register(Box::new(a));
    let b = manager.register(Box::new(b));
    manager.unregister(&b);

    for id in [b.id(), SoundId::from_raw(999), a.id()] {
        sink.commit(PositionReport {
            id,
            frame: 7,
            position: 3,
            got_frames: 10,
        });
    }
    manager.update(0.0);

    assert_eq!(log_a.lock().unwrap().commits, vec![(7, 3, 10)]);
    assert!(log_b.lock().unwrap().commits.is_empty());
    assert_eq!(manager.dropped_reports(), 0);
}

#[test]
fn test_finished_copy_is_deleted_on_the_next_update_only() {
    let manager = null_manager();
    let (recorder, _log, copies) = RecordingSound::new(20);
    let sound = manager.register(Box::new(recorder));

    manager.play(&sound, None).unwrap();
    let copy = manager.play(&sound, None).unwrap();
    let copy_id = copy.id();
    drop(copy);
    let copy_log = copies.lock().unwrap()[0].clone();

    // Two slices render all 20 frames of both sounds
    manager.update(0.01);
    manager.update(0.01);
    assert_eq!(manager.pending_delete_count(), 0);

    // This tick notices the copy finished and tags it
    manager.update(0.0);
    assert_eq!(manager.pending_delete_count(), 1);
    assert!(!copy_log.lock().unwrap().dropped);
    let ticks = copy_log.lock().unwrap().ticks;

    manager.update(0.0);
    assert_eq!(manager.pending_delete_count(), 0);
    assert_eq!(manager.sound_count(), 1);
    assert!(copy_log.lock().unwrap().dropped);
    assert_eq!(copy_log.lock().unwrap().ticks, ticks);

    // The original is application-owned and stays registered
    assert!(manager.is_registered(&sound));
    assert!(!sound.lock().is_playing());
    assert_ne!(sound.id(), copy_id);
}

#[test]
fn test_stop_mixing_external_sound_keeps_it() {
    let manager = null_manager();
    let (recorder, _log, _) = RecordingSound::new(100);
    let sound = manager.register(Box::new(recorder));
    manager.play(&sound, None).unwrap();

    manager.stop_mixing(&sound);
    manager.update(0.0);
    assert!(manager.is_registered(&sound));
    assert_eq!(manager.pending_delete_count(), 0);
}

#[test]
fn test_replaying_a_finished_sound_reuses_it() {
    let manager = null_manager();
    let (recorder, _log, copies) = RecordingSound::new(10);
    let sound = manager.register(Box::new(recorder));

    manager.play(&sound, None).unwrap();
    manager.update(0.01);
    manager.update(0.0);
    assert!(!sound.lock().is_playing());

    let again = manager.play(&sound, None).unwrap();
    assert_eq!(again, sound);
    assert!(copies.lock().unwrap().is_empty());
}

struct FixedLoader {
    frames: usize,
}

impl SoundLoader for FixedLoader {
    fn load(&self, path: &Path, options: &LoadOptions) -> soundman::error::Result<Box<dyn Sound>> {
        assert!(!options.prebuffer);
        if path.ends_with("missing.wav") {
            return Err(SoundManError::AudioLoading("not found".into()));
        }
        Ok(Box::new(PcmSound::new(vec![500i16; self.frames], 1, 1000)?))
    }
}

#[test]
fn test_play_once_is_owned_and_reclaimed() {
    let manager = null_manager().with_loader(FixedLoader { frames: 15 });

    let handle = manager.play_once("sfx/click.wav").unwrap();
    assert!(handle.lock().is_playing());
    assert_eq!(manager.owned_count(), 1);

    assert!(manager.play_once("sfx/missing.wav").is_err());
    assert_eq!(manager.sound_count(), 1);

    manager.update(0.02);
    manager.update(0.0);
    assert_eq!(manager.pending_delete_count(), 1);
    manager.update(0.0);
    assert_eq!(manager.sound_count(), 0);
    assert!(!manager.is_registered(&handle));
}

#[test]
fn test_drop_deletes_owned_sounds() {
    let manager = null_manager();
    let (recorder, log, copies) = RecordingSound::new(1000);
    let sound = manager.register(Box::new(recorder));
    manager.play(&sound, None).unwrap();
    manager.play(&sound, None).unwrap();
    manager.update(0.01);

    let copy_log = copies.lock().unwrap()[0].clone();
    drop(manager);

    assert!(copy_log.lock().unwrap().dropped);
    assert!(!log.lock().unwrap().dropped);
    drop(sound);
    assert!(log.lock().unwrap().dropped);
}

#[test]
fn test_concurrent_play_and_update() {
    let _ = env_logger::builder().is_test(true).try_init();
    let manager = Arc::new(
        SoundManager::new(desc().max_voices(128), |ctx| Ok(Box::new(NullDriver::new(ctx))))
            .unwrap(),
    );
    let (recorder, _log, _) = RecordingSound::new(100_000);
    let sound = manager.register(Box::new(recorder));

    let updater = {
        let manager = manager.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                manager.update(0.001);
            }
        })
    };

    let players: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let sound = sound.clone();
            std::thread::spawn(move || {
                (0..25)
                    .map(|_| manager.play(&sound, None).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    for player in players {
        for handle in player.join().unwrap() {
            assert_eq!(handle.original(), sound.id());
            ids.insert(handle.id());
        }
    }
    updater.join().unwrap();

    assert_eq!(ids.len(), 100);
    assert_eq!(manager.owned_count(), 99);

    manager.stop_all_copies_of(&sound);
    manager.update(0.0);
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(manager.pending_delete_count(), 0);
    assert_eq!(manager.sound_count(), 1);
}

#[test]
fn test_sounds_over_the_voice_limit_are_reclaimed() {
    let _ = env_logger::builder().is_test(true).try_init();
    let manager =
        SoundManager::new(desc().max_voices(2), |ctx| Ok(Box::new(NullDriver::new(ctx)))).unwrap();
    let sound = manager.register(Box::new(PcmSound::new(vec![1000i16; 20], 1, 1000).unwrap()));

    // Two voices mix, two are refused by the mixer, one never fits the
    // command queue
    let handles: Vec<_> = (0..5).map(|_| manager.play(&sound, None).unwrap()).collect();
    assert_eq!(manager.owned_count(), 4);

    for _ in 0..4 {
        manager.update(0.01);
    }

    assert!(handles.iter().all(|h| !h.lock().is_playing()));
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(manager.pending_delete_count(), 0);
    assert_eq!(manager.sound_count(), 1);
}

#[test]
fn test_burst_of_plays_does_not_leak_copies() {
    let _ = env_logger::builder().is_test(true).try_init();
    let manager =
        SoundManager::new(desc().max_voices(64), |ctx| Ok(Box::new(NullDriver::new(ctx)))).unwrap();
    let sound = manager.register(Box::new(PcmSound::new(vec![1000i16; 20], 1, 1000).unwrap()));

    for _ in 0..200 {
        manager.play(&sound, None).unwrap();
    }
    assert_eq!(manager.owned_count(), 199);

    for _ in 0..10 {
        manager.update(0.01);
    }
    assert_eq!(manager.owned_count(), 0);
    assert_eq!(manager.sound_count(), 1);
}
