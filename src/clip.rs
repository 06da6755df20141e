use ahash::HashMap;
use glam::{Quat, Vec3};

use crate::{
    storage::{Handle, Storage},
    track::Track,
};

/// A named bundle of keyframe curves driving bone transforms over frames.
/// Channels address bones by name.
#[derive(Debug, Default)]
pub struct Clip {
    pub name: String,
    translations: HashMap<String, Track<Vec3>>,
    rotations: HashMap<String, Track<Quat>>,
    /// Pinned clips survive [ClipStore::release] even with no users.
    pinned: bool,
    /// Number of active-clip bindings referencing this clip.
    users: u32,
}

impl Clip {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Last keyed frame over all channels, floor 1. A clip with no channels
    /// still spans a single frame.
    pub fn frame_end(&self) -> u32 {
        self.translations
            .values()
            .filter_map(|t| t.last_frame())
            .chain(self.rotations.values().filter_map(|t| t.last_frame()))
            .max()
            .unwrap_or(0)
            .max(1)
    }

    pub fn insert_translation_key(&mut self, bone: &str, frame: u32, value: Vec3) {
        self.translations
            .entry(bone.to_string())
            .or_default()
            .insert(frame, value);
    }

    pub fn insert_rotation_key(&mut self, bone: &str, frame: u32, value: Quat) {
        self.rotations
            .entry(bone.to_string())
            .or_default()
            .insert(frame, value);
    }

    pub fn sample_translation(&self, bone: &str, frame: f32) -> Option<Vec3> {
        self.translations.get(bone).and_then(|t| t.sample(frame))
    }

    pub fn sample_rotation(&self, bone: &str, frame: f32) -> Option<Quat> {
        self.rotations.get(bone).and_then(|t| t.sample(frame))
    }

    pub fn translation_track(&self, bone: &str) -> Option<&Track<Vec3>> {
        self.translations.get(bone)
    }

    pub fn rotation_track(&self, bone: &str) -> Option<&Track<Quat>> {
        self.rotations.get(bone)
    }

    /// Rewrite every channel addressing `old` to address `new` instead.
    pub fn retarget_channels(&mut self, old: &str, new: &str) {
        if let Some(track) = self.translations.remove(old) {
            self.translations.insert(new.to_string(), track);
        }
        if let Some(track) = self.rotations.remove(old) {
            self.rotations.insert(new.to_string(), track);
        }
    }
}

/// The global clip store. Clips live here for the whole scene; objects
/// reference them through handles.
#[derive(Default)]
pub struct ClipStore {
    clips: Storage<Clip>,
}

impl ClipStore {
    pub fn create(&mut self, name: impl Into<String>) -> Handle<Clip> {
        self.clips.insert(Clip::new(name))
    }

    pub fn insert(&mut self, clip: Clip) -> Handle<Clip> {
        self.clips.insert(clip)
    }

    pub fn get(&self, handle: Handle<Clip>) -> Option<&Clip> {
        self.clips.get(handle)
    }

    pub fn get_mut(&mut self, handle: Handle<Clip>) -> Option<&mut Clip> {
        self.clips.get_mut(handle)
    }

    pub fn find(&self, name: &str) -> Option<Handle<Clip>> {
        self.clips
            .iter()
            .find(|(_, clip)| clip.name == name)
            .map(|(handle, _)| handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<Clip>, &Clip)> {
        self.clips.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<Clip>, &mut Clip)> {
        self.clips.iter_mut()
    }

    /// All clips, de-duplicated by name, in store order.
    pub fn list_all(&self) -> Vec<Handle<Clip>> {
        let mut seen = ahash::HashSet::default();
        self.clips
            .iter()
            .filter(|(_, clip)| seen.insert(clip.name.clone()))
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn rename(&mut self, handle: Handle<Clip>, name: impl Into<String>) {
        if let Some(clip) = self.clips.get_mut(handle) {
            clip.name = name.into();
        }
    }

    pub fn pin(&mut self, handle: Handle<Clip>) {
        if let Some(clip) = self.clips.get_mut(handle) {
            clip.pinned = true;
        }
    }

    pub fn unpin(&mut self, handle: Handle<Clip>) {
        if let Some(clip) = self.clips.get_mut(handle) {
            clip.pinned = false;
        }
    }

    pub(crate) fn add_user(&mut self, handle: Handle<Clip>) {
        if let Some(clip) = self.clips.get_mut(handle) {
            clip.users += 1;
        }
    }

    pub(crate) fn remove_user(&mut self, handle: Handle<Clip>) {
        if let Some(clip) = self.clips.get_mut(handle) {
            debug_assert!(clip.users > 0, "clip user count underflow");
            clip.users = clip.users.saturating_sub(1);
        }
    }

    /// Drop the clip if nothing holds on to it. Pinned or still-referenced
    /// clips are kept.
    pub fn release(&mut self, handle: Handle<Clip>) {
        let drop = self
            .clips
            .get(handle)
            .is_some_and(|clip| !clip.pinned && clip.users == 0);
        if drop {
            self.clips.remove(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}
