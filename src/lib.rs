//! # soundman
//!
//! Realtime-safe sound lifecycle and mixing manager.
//!
//! soundman owns every active sound of an application, decides whether a
//! play request mixes the sound itself or a copy of it (so one logical sound
//! can overlap itself), and bridges the audio driver's render thread with the
//! application's update thread without ever making the render thread wait.
//!
//! ## Quick Start
//!
//! ```no_run
//! use soundman::*;
//!
//! let desc = SoundManagerDesc::default();
//! let manager = SoundManager::new(desc, |ctx| make_driver("cpal,null", ctx))?;
//!
//! // Register a sound the application keeps around
//! let samples: Vec<i16> = (0..48000).map(|i| ((i % 100) * 300) as i16).collect();
//! let click = manager.register(Box::new(PcmSound::new(samples, 1, 48000)?));
//!
//! // Playing it while it is still playing mixes a managed copy
//! let first = manager.play(&click, None)?;
//! let second = manager.play(&click, Some(SoundParams::default().volume(0.5)))?;
//! assert_eq!(first.original(), second.original());
//!
//! // Fire-and-forget
//! manager.play_once("assets/explosion.ogg")?;
//!
//! // Once per frame
//! manager.update(1.0 / 60.0);
//!
//! // Silence every instance of the click
//! manager.stop_all_copies_of(&click);
//! # Ok::<(), SoundManError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`SoundManager`]**: registry, play/copy/stop semantics, deferred deletion
//! - **[`SoundDriver`]**: output backends ([`CpalDriver`], [`NullDriver`])
//! - **[`MixBuffer`]**: 32-bit accumulation of 16-bit streams with clipping
//! - **[`ReportSink`]** / **[`ReportQueue`]**: lock-free position reports from
//!   the render thread to the manager
//! - **[`Sound`]** / **[`PcmSound`]**: the playable object contract and an
//!   in-memory implementation
//!
//! ## Architecture
//!
//! 1. **Control threads**: call `play`, `stop_all_copies_of`, `set_mix_volume`
//! 2. **Update thread**: calls `update` once per frame; routes position
//!    reports, deletes finished managed sounds, ticks sounds and driver
//! 3. **Render thread**: owned by the driver; mixes sounds and commits
//!    position reports. It never takes the manager's lock.

pub mod config;
pub mod driver;
pub mod error;
pub mod loader;
pub mod manager;
pub mod mixing;
pub mod report;
pub mod sound;

pub use config::SoundManagerDesc;
pub use driver::{CpalDriver, DriverContext, MixVolume, NullDriver, SoundDriver, make_driver};
pub use error::SoundManError;
pub use loader::{LoadOptions, SoundLoader, SymphoniaLoader};
pub use manager::SoundManager;
pub use mixing::{MixBuffer, attenuate};
pub use report::{PositionReport, ReportQueue, ReportSink, report_channel};
pub use sound::{PcmSound, Sound, SoundHandle, SoundId, SoundParams};
