use soundman::*;
use std::time::{Duration, Instant};

/// Plays an overlapping beep through the default output device, plus an
/// optional file given on the command line as a one-shot.
///
/// Run with `RUST_LOG=debug` to watch copies being made and reclaimed.
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let desc = SoundManagerDesc::default().sample_rate(48000).channels(2);
    let manager = SoundManager::new(desc, |ctx| make_driver("cpal,null", ctx))?;
    println!(
        "Driver at {} Hz, {:.1} ms latency",
        manager.driver_sample_rate(None),
        manager.play_latency() * 1000.0
    );

    // 0.4 s of 440 Hz at low volume
    let rate = 48000;
    let samples: Vec<i16> = (0..rate * 2 / 5)
        .map(|i| {
            let t = i as f32 / rate as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 3000.0) as i16
        })
        .collect();
    let beep = manager.register(Box::new(PcmSound::new(samples, 1, rate as u32)?));

    if let Some(path) = std::env::args().nth(1) {
        let handle = manager.play_once(&path)?;
        println!("Playing {} once as {}", path, handle.id());
    }

    let frame = Duration::from_secs_f32(1.0 / 60.0);
    let started = Instant::now();
    let mut last = started;
    let mut next_beep = Duration::ZERO;

    while started.elapsed() < Duration::from_secs(3) {
        if started.elapsed() >= next_beep {
            let playing = manager.play(&beep, None)?;
            println!(
                "Beep as {} ({} live, {} awaiting deletion)",
                playing.id(),
                manager.copies_of(&beep).len(),
                manager.pending_delete_count()
            );
            next_beep += Duration::from_millis(150);
        }

        let now = Instant::now();
        manager.update((now - last).as_secs_f32());
        last = now;
        std::thread::sleep(frame);
    }

    manager.stop_all_copies_of(&beep);
    manager.update(0.0);
    manager.update(0.0);
    println!(
        "Stopped. {} sounds registered, {} reports dropped",
        manager.sound_count(),
        manager.dropped_reports()
    );

    Ok(())
}
