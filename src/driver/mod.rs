//! Sound drivers: the realtime side of the manager.
//!
//! A [`SoundDriver`] receives sounds to mix from the manager and renders them
//! on its own schedule, committing a position report per sound per slice
//! through the [`DriverContext`] it was created with. Drivers bundled here
//! share their render loop through [`VoiceMixer`].

mod cpal_driver;
mod mixer;
mod null;

pub use cpal_driver::CpalDriver;
pub use mixer::{VoiceControl, VoiceMixer, voice_channel};
pub use null::NullDriver;

use crate::config::SoundManagerDesc;
use crate::error::{Result, SoundManError};
use crate::report::ReportSink;
use crate::sound::{SoundHandle, SoundId};
use atomic_float::AtomicF32;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Platform audio output as seen by the manager.
///
/// All methods are called from control threads with the manager's lock
/// held. Implementations must not call back into the manager.
pub trait SoundDriver: Send {
    /// Short name used in logs and by [`make_driver`]
    fn name(&self) -> &str;

    /// Begin mixing `sound`. The driver keeps a clone of the handle until
    /// the sound finishes or `stop_mixing` is called.
    fn start_mixing(&mut self, sound: &SoundHandle);

    /// Stop mixing the sound with this id, if it is mixing
    fn stop_mixing(&mut self, id: SoundId);

    /// Driver frame currently being heard
    fn position(&self, id: SoundId) -> i64;

    /// Per-frame tick from the manager's update
    fn update(&mut self, delta: f32);

    /// Rate sounds are actually played at, given the rate they were made for
    fn sample_rate(&self, requested: Option<u32>) -> u32;

    /// Seconds between rendering a frame and hearing it
    fn play_latency(&self) -> f32;

    /// The global mix volume changed
    fn volume_changed(&mut self) {}
}

/// Global mix volume shared between the manager and the render thread
#[derive(Debug, Clone)]
pub struct MixVolume(Arc<AtomicF32>);

impl MixVolume {
    pub fn new(volume: f32) -> Self {
        Self(Arc::new(AtomicF32::new(volume)))
    }

    pub fn get(&self) -> f32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, volume: f32) {
        self.0.store(volume, Ordering::Relaxed);
    }
}

/// Everything a driver needs from the manager
#[derive(Clone)]
pub struct DriverContext {
    pub desc: SoundManagerDesc,
    /// Where the render loop commits position reports
    pub reports: ReportSink,
    pub mix_volume: MixVolume,
}

/// Construct the first driver in a comma-separated list that works.
///
/// Known names are `cpal` and `null`.
pub fn make_driver(names: &str, ctx: DriverContext) -> Result<Box<dyn SoundDriver>> {
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let driver: Result<Box<dyn SoundDriver>> = match name {
            "cpal" => CpalDriver::new(ctx.clone()).map(|d| Box::new(d) as Box<dyn SoundDriver>),
            "null" => Ok(Box::new(NullDriver::new(ctx.clone()))),
            other => Err(SoundManError::Configuration(format!(
                "unknown sound driver '{}'",
                other
            ))),
        };

        match driver {
            Ok(driver) => {
                log::info!("Using sound driver '{}'", driver.name());
                return Ok(driver);
            }
            Err(e) => log::warn!("Sound driver '{}' unavailable: {}", name, e),
        }
    }

    Err(SoundManError::NoDriver(format!(
        "couldn't find a sound driver that works (tried '{}')",
        names
    )))
}
