//! Sound lifecycle management.
//!
//! [`SoundManager`] keeps the registry of live sounds, decides whether a
//! play request mixes the sound itself or a copy of it, hands sounds to the
//! driver, and reclaims the copies and one-shots it owns once they finish.
//!
//! # Threading
//!
//! Every operation takes one coarse lock. The driver's render thread never
//! touches it: position reports arrive through the lock-free report channel
//! and are routed during [`update`](SoundManager::update), and finished
//! sounds are only tagged for deletion, then reclaimed by the next `update`.
//!
//! Lock order is manager first, then an individual sound. Do not call into
//! the manager while holding a [`SoundHandle::lock`] guard.

use crate::config::SoundManagerDesc;
use crate::driver::{DriverContext, MixVolume, SoundDriver};
use crate::error::{Result, SoundManError};
use crate::loader::{LoadOptions, SoundLoader, SymphoniaLoader};
use crate::report::{ReportQueue, report_channel};
use crate::sound::{Sound, SoundHandle, SoundId, SoundParams};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Who is responsible for destroying a registered sound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Registered by the application, which keeps it alive
    External,
    /// Copy or one-shot created by the manager
    Owned,
    /// Owned and finished; removed on the next update
    PendingDelete,
}

struct Slot {
    handle: SoundHandle,
    ownership: Ownership,
    /// The driver has been told to mix this sound and not told to stop
    mixing: bool,
}

struct Inner {
    slots: BTreeMap<SoundId, Slot>,
    next_id: u64,
    reports: ReportQueue,
    /// Overflow count already warned about
    dropped_seen: u64,
    driver: Box<dyn SoundDriver>,
}

impl Inner {
    fn insert(
        &mut self,
        sound: Box<dyn Sound>,
        original: Option<SoundId>,
        ownership: Ownership,
    ) -> SoundHandle {
        self.next_id += 1;
        let id = SoundId::from_raw(self.next_id);

        if original.is_none() {
            let rate = sound.sample_rate();
            let driver_rate = self.driver.sample_rate(Some(rate));
            if rate != driver_rate {
                log::warn!(
                    "{} is {} Hz but the driver plays at {} Hz; it will play off-pitch",
                    id,
                    rate,
                    driver_rate
                );
            }
        }

        let handle = SoundHandle::new(id, original.unwrap_or(id), sound);
        log::debug!("Registered {} ({:?})", id, ownership);
        self.slots.insert(
            id,
            Slot {
                handle: handle.clone(),
                ownership,
                mixing: false,
            },
        );
        handle
    }

    fn start_mixing(&mut self, handle: &SoundHandle) {
        self.driver.start_mixing(handle);
        if let Some(slot) = self.slots.get_mut(&handle.id()) {
            slot.mixing = true;
        }
    }

    fn stop_mixing(&mut self, id: SoundId) {
        self.driver.stop_mixing(id);

        // Never delete here: the caller may be in the middle of using the
        // sound. Owned sounds are reclaimed by the next update.
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.mixing = false;
            if slot.ownership == Ownership::Owned {
                log::debug!("{} finished, deleting on next update", id);
                slot.ownership = Ownership::PendingDelete;
            }
        }
    }

    fn flush_reports(&mut self) -> usize {
        let dropped = self.reports.dropped();
        if dropped > self.dropped_seen {
            log::warn!(
                "Position report queue overflowed, {} reports lost",
                dropped - self.dropped_seen
            );
            self.dropped_seen = dropped;
        }

        let slots = &self.slots;
        self.reports.drain(|report| match slots.get(&report.id) {
            Some(slot) => slot.handle.lock().commit_playing_position(
                report.frame,
                report.position,
                report.got_frames,
            ),
            None => log::trace!("Ignored unknown (stale?) commit for {}", report.id),
        })
    }

    fn delete_pending(&mut self) {
        self.slots.retain(|id, slot| {
            if slot.ownership == Ownership::PendingDelete {
                log::debug!("Deleting {}", id);
                false
            } else {
                true
            }
        });
    }

    fn copies_of(&self, original: SoundId) -> Vec<SoundHandle> {
        self.slots
            .values()
            .filter(|slot| slot.handle.original() == original)
            .map(|slot| slot.handle.clone())
            .collect()
    }

    fn count(&self, ownership: Ownership) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.ownership == ownership)
            .count()
    }
}

/// Owner of every active sound and the bridge to the sound driver.
///
/// Construct one explicitly at startup and share it (by reference or `Arc`)
/// with whatever needs to play sounds. `update` must be called regularly,
/// typically once per frame, from a single thread.
pub struct SoundManager {
    inner: Mutex<Inner>,
    mix_volume: MixVolume,
    loader: Box<dyn SoundLoader>,
    desc: SoundManagerDesc,
}

impl SoundManager {
    /// Create a manager whose driver is built by `factory`.
    ///
    /// Without a working driver nothing can play, so a factory error fails
    /// construction with [`SoundManError::NoDriver`].
    pub fn new<F>(desc: SoundManagerDesc, factory: F) -> Result<Self>
    where
        F: FnOnce(DriverContext) -> Result<Box<dyn SoundDriver>>,
    {
        desc.validate()?;

        let (reports, queue) = report_channel(desc.report_capacity);
        let mix_volume = MixVolume::new(desc.mix_volume.clamp(0.0, 1.0));
        let ctx = DriverContext {
            desc: desc.clone(),
            reports,
            mix_volume: mix_volume.clone(),
        };

        let driver = factory(ctx).map_err(|e| match e {
            SoundManError::NoDriver(_) => e,
            other => SoundManError::NoDriver(other.to_string()),
        })?;
        log::info!("Sound manager running on the '{}' driver", driver.name());

        Ok(Self {
            inner: Mutex::new(Inner {
                slots: BTreeMap::new(),
                next_id: 0,
                reports: queue,
                dropped_seen: 0,
                driver,
            }),
            mix_volume,
            loader: Box::new(SymphoniaLoader),
            desc,
        })
    }

    /// Replace the loader used by [`play_once`](Self::play_once)
    pub fn with_loader(mut self, loader: impl SoundLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn desc(&self) -> &SoundManagerDesc {
        &self.desc
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an application-owned sound and assign it the next id.
    ///
    /// The sound receives `update` ticks and position reports until
    /// [`unregister`](Self::unregister) is called.
    pub fn register(&self, sound: Box<dyn Sound>) -> SoundHandle {
        self.lock().insert(sound, None, Ownership::External)
    }

    /// Remove a sound from the registry, stopping it in the driver if needed
    pub fn unregister(&self, sound: &SoundHandle) {
        let mut inner = self.lock();
        match inner.slots.remove(&sound.id()) {
            Some(slot) => {
                if slot.mixing {
                    inner.driver.stop_mixing(sound.id());
                }
                log::debug!("Unregistered {}", sound.id());
            }
            None => log::trace!("Unregister of unknown {}", sound.id()),
        }
    }

    /// Play `sound`, or a copy of it if it is already playing.
    ///
    /// `params`, when given, replace the parameters of whichever sound ends
    /// up playing. Playback starts at `start_second` of the effective
    /// parameters. Returns the handle actually playing; copies are owned by
    /// the manager and deleted after they finish.
    pub fn play(&self, sound: &SoundHandle, params: Option<SoundParams>) -> Result<SoundHandle> {
        let mut inner = self.lock();
        let ownership = inner
            .slots
            .get(&sound.id())
            .map(|slot| slot.ownership)
            .ok_or(SoundManError::UnknownSound(sound.id()))?;

        let busy = ownership == Ownership::PendingDelete || sound.lock().is_playing();
        let to_play = if busy {
            let copy = sound.lock().duplicate();
            let handle = inner.insert(copy, Some(sound.original()), Ownership::Owned);
            log::debug!("{} is busy, playing copy {}", sound.id(), handle.id());
            handle
        } else {
            sound.clone()
        };

        {
            let mut playing = to_play.lock();
            if let Some(params) = params {
                playing.set_params(params);
            }
            let start = playing.params().start_second;
            playing.set_position_seconds(start);
            playing.start();
        }
        inner.start_mixing(&to_play);

        Ok(to_play)
    }

    /// Stop every playing instance of the sound `sound` was copied from,
    /// including the original itself
    pub fn stop_all_copies_of(&self, sound: &SoundHandle) {
        let mut inner = self.lock();
        let copies = inner.copies_of(sound.original());
        if copies.is_empty() {
            log::trace!("No registered copies of {}", sound.original());
        }

        for copy in copies {
            let was_playing = {
                let mut instance = copy.lock();
                let playing = instance.is_playing();
                if playing {
                    instance.stop();
                }
                playing
            };
            if was_playing {
                inner.stop_mixing(copy.id());
            }
        }
    }

    /// Registered handles sharing `sound`'s original, itself included
    pub fn copies_of(&self, sound: &SoundHandle) -> Vec<SoundHandle> {
        self.lock().copies_of(sound.original())
    }

    /// Hand a registered sound to the driver for mixing
    pub fn start_mixing(&self, sound: &SoundHandle) -> Result<()> {
        let mut inner = self.lock();
        if !inner.slots.contains_key(&sound.id()) {
            return Err(SoundManError::UnknownSound(sound.id()));
        }
        inner.start_mixing(sound);
        Ok(())
    }

    /// Take a sound away from the driver. A manager-owned sound becomes
    /// pending-delete and is destroyed by the next [`update`](Self::update).
    pub fn stop_mixing(&self, sound: &SoundHandle) {
        self.lock().stop_mixing(sound.id());
    }

    /// Periodic tick, normally once per frame.
    ///
    /// In order: route queued position reports, destroy pending-delete
    /// sounds, tick every remaining sound (retiring the ones that finished),
    /// then tick the driver. A sound is therefore never ticked after it was
    /// tagged for deletion and never destroyed while its reports are routed.
    pub fn update(&self, delta: f32) {
        let mut inner = self.lock();

        inner.flush_reports();
        inner.delete_pending();

        let mut finished = Vec::new();
        for (id, slot) in &inner.slots {
            let mut sound = slot.handle.lock();
            sound.update(delta);
            if slot.mixing && !sound.is_playing() {
                finished.push(*id);
            }
        }
        for id in finished {
            inner.stop_mixing(id);
        }

        inner.driver.update(delta);
    }

    /// Load `path` and play it once, without prebuffering. The manager owns
    /// the sound and deletes it when it finishes.
    pub fn play_once(&self, path: impl AsRef<Path>) -> Result<SoundHandle> {
        let path = path.as_ref();
        let sound = self
            .loader
            .load(path, &LoadOptions::new().prebuffer(false))?;

        let mut inner = self.lock();
        let handle = inner.insert(sound, None, Ownership::Owned);
        handle.lock().start();
        inner.start_mixing(&handle);
        log::debug!("Playing {} once as {}", path.display(), handle.id());
        Ok(handle)
    }

    /// Set the global mix volume (clamped to 0.0..=1.0) and tell the driver
    pub fn set_mix_volume(&self, volume: f32) {
        let mut inner = self.lock();
        self.mix_volume.set(volume.clamp(0.0, 1.0));
        inner.driver.volume_changed();
    }

    pub fn mix_volume(&self) -> f32 {
        self.mix_volume.get()
    }

    /// Position, in frames, of the sound currently being heard
    pub fn position(&self, sound: &SoundHandle) -> Option<i64> {
        let frame = {
            let inner = self.lock();
            if !inner.slots.contains_key(&sound.id()) {
                return None;
            }
            inner.driver.position(sound.id())
        };
        sound.lock().position_at(frame)
    }

    /// Like [`position`](Self::position), in seconds
    pub fn position_seconds(&self, sound: &SoundHandle) -> Option<f32> {
        let frames = self.position(sound)?;
        let rate = sound.lock().sample_rate();
        Some(frames as f32 / rate as f32)
    }

    /// Seconds between rendering a frame and hearing it
    pub fn play_latency(&self) -> f32 {
        self.lock().driver.play_latency()
    }

    /// Rate the driver will play a sound made for `requested` Hz at
    pub fn driver_sample_rate(&self, requested: Option<u32>) -> u32 {
        self.lock().driver.sample_rate(requested)
    }

    /// Whether the sound is registered and currently playing
    pub fn is_playing(&self, sound: &SoundHandle) -> bool {
        self.is_registered(sound) && sound.lock().is_playing()
    }

    pub fn is_registered(&self, sound: &SoundHandle) -> bool {
        self.lock().slots.contains_key(&sound.id())
    }

    /// All registered sounds, pending-delete ones included
    pub fn sound_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Manager-owned sounds still live
    pub fn owned_count(&self) -> usize {
        self.lock().count(Ownership::Owned)
    }

    pub fn pending_delete_count(&self) -> usize {
        self.lock().count(Ownership::PendingDelete)
    }

    /// Position reports lost to channel overflow so far
    pub fn dropped_reports(&self) -> u64 {
        self.lock().reports.dropped()
    }
}

impl Drop for SoundManager {
    fn drop(&mut self) {
        // Exclusive access, so nothing is locked from here on; the driver
        // drops after this with the other fields and may join its thread.
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());

        let owned: Vec<SoundId> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.ownership != Ownership::External)
            .map(|(id, _)| *id)
            .collect();
        for id in &owned {
            if let Some(slot) = inner.slots.remove(id) {
                if slot.mixing {
                    inner.driver.stop_mixing(*id);
                }
            }
        }
        log::debug!("Deleted {} owned sounds at shutdown", owned.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NullDriver;
    use crate::sound::PcmSound;

    fn manager() -> SoundManager {
        let desc = SoundManagerDesc::default().sample_rate(1000).block_size(10);
        SoundManager::new(desc, |ctx| Ok(Box::new(NullDriver::new(ctx)))).unwrap()
    }

    fn tone(frames: usize) -> Box<dyn Sound> {
        Box::new(PcmSound::new(vec![1000i16; frames], 1, 1000).unwrap())
    }

    #[test]
    fn test_manager_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SoundManager>();
    }

    #[test]
    fn test_factory_failure_is_fatal() {
        let result = SoundManager::new(SoundManagerDesc::default(), |_| {
            Err(SoundManError::AudioDevice("no device".into()))
        });
        assert!(matches!(result, Err(SoundManError::NoDriver(_))));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let manager = manager();
        let a = manager.register(tone(10));
        let b = manager.register(tone(10));
        manager.unregister(&a);
        let c = manager.register(tone(10));
        assert_eq!(a.id().raw(), 1);
        assert_eq!(b.id().raw(), 2);
        assert_eq!(c.id().raw(), 3);
        assert_eq!(c.original(), c.id());
    }

    #[test]
    fn test_play_idle_sound_plays_it_directly() {
        let manager = manager();
        let sound = manager.register(tone(100));
        let playing = manager.play(&sound, None).unwrap();
        assert_eq!(playing, sound);
        assert!(manager.is_playing(&sound));
        assert_eq!(manager.owned_count(), 0);

        manager.unregister(&sound);
        assert!(!manager.is_playing(&sound));
    }

    #[test]
    fn test_play_unregistered_sound_fails() {
        let manager = manager();
        let sound = manager.register(tone(100));
        manager.unregister(&sound);
        assert!(matches!(
            manager.play(&sound, None),
            Err(SoundManError::UnknownSound(_))
        ));
        assert!(manager.start_mixing(&sound).is_err());
    }

    #[test]
    fn test_play_applies_params_and_start_offset() {
        let manager = manager();
        let sound = manager.register(tone(1000));
        let params = SoundParams::default().start_second(0.5).volume(0.5);
        manager.play(&sound, Some(params.clone())).unwrap();

        let guard = sound.lock();
        assert_eq!(guard.params(), &params);
        assert!(guard.is_playing());
        drop(guard);
        assert_eq!(manager.position(&sound), None);

        manager.update(0.0);
        manager.update(0.1);
        manager.update(0.0);
        assert_eq!(manager.position(&sound), Some(600));
        assert_eq!(manager.position_seconds(&sound), Some(0.6));
    }

    #[test]
    fn test_set_mix_volume_clamps() {
        let manager = manager();
        manager.set_mix_volume(0.4);
        assert_eq!(manager.mix_volume(), 0.4);
        manager.set_mix_volume(3.0);
        assert_eq!(manager.mix_volume(), 1.0);
        manager.set_mix_volume(-1.0);
        assert_eq!(manager.mix_volume(), 0.0);
    }

    #[test]
    fn test_driver_queries() {
        let manager = manager();
        assert_eq!(manager.driver_sample_rate(Some(44100)), 1000);
        assert_eq!(manager.play_latency(), 0.0);
    }
}
