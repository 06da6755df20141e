use crate::interpolate::Interpolate;

#[derive(Clone, Copy, Debug)]
pub struct Key<V> {
    pub frame: u32,
    pub value: V,
}

/// A single keyframe curve: values keyed by integer frame, kept sorted.
#[derive(Clone, Debug)]
pub struct Track<V> {
    keys: Vec<Key<V>>,
}

impl<V> Default for Track<V> {
    fn default() -> Self {
        Self {
            keys: Vec::default(),
        }
    }
}

impl<V: Interpolate> Track<V> {
    /// Return the frame number of the last key frame.
    #[inline]
    pub fn last_frame(&self) -> Option<u32> {
        self.keys.last().map(|k| k.frame)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn insert(&mut self, frame: u32, value: V) {
        match self.keys.binary_search_by_key(&frame, |k| k.frame) {
            Ok(i) => self.keys[i].value = value,                 // last wins
            Err(i) => self.keys.insert(i, Key { frame, value }), // keep sorted
        }
    }

    /// The exact value keyed at `frame`, if a key exists there.
    pub fn key_at(&self, frame: u32) -> Option<V> {
        self.keys
            .binary_search_by_key(&frame, |k| k.frame)
            .ok()
            .map(|i| self.keys[i].value)
    }

    /// Interpolated value at a fractional frame index, clamped to the keyed
    /// range. Returns `None` for an empty track.
    pub fn sample(&self, frame_f: f32) -> Option<V> {
        if self.keys.is_empty() {
            return None;
        }

        if self.keys.len() == 1 {
            return Some(self.keys[0].value);
        }

        let first = self.keys[0].frame as f32;
        let last = self.keys[self.keys.len() - 1].frame as f32;

        let f = frame_f.clamp(first, last);
        if f <= first {
            return Some(self.keys[0].value);
        }
        if f >= last {
            return Some(self.keys[self.keys.len() - 1].value);
        }

        let i = self.keys.partition_point(|k| (k.frame as f32) <= f);
        let a = self.keys[i - 1];
        let b = self.keys[i];
        let t = ((f - a.frame as f32) / (b.frame as f32 - a.frame as f32)).clamp(0.0, 1.0);

        Some(V::interpolate(a.value, b.value, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[inline]
    fn approx_v3(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn interpolates_vec3_midpoint() {
        let mut t = Track::<Vec3>::default();
        t.insert(0, Vec3::new(0.0, 0.0, 0.0));
        t.insert(10, Vec3::new(10.0, 0.0, 0.0));

        let v = t.sample(5.0).unwrap();
        assert!(approx_v3(v, Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn exact_key_hit() {
        let mut t = Track::<Vec3>::default();
        t.insert(0, Vec3::splat(1.0));
        t.insert(8, Vec3::splat(3.0));
        t.insert(12, Vec3::splat(7.0));

        let v = t.sample(8.0).unwrap();
        assert!(approx_v3(v, Vec3::splat(3.0)));
        assert!(t.key_at(8).is_some());
        assert!(t.key_at(9).is_none());
    }

    #[test]
    fn clamps_before_after_range() {
        let mut t = Track::<Vec3>::default();
        t.insert(2, Vec3::new(2.0, 0.0, 0.0));
        t.insert(6, Vec3::new(6.0, 0.0, 0.0));

        let v0 = t.sample(0.0).unwrap();
        assert!(approx_v3(v0, Vec3::new(2.0, 0.0, 0.0)));

        let v1 = t.sample(100.0).unwrap();
        assert!(approx_v3(v1, Vec3::new(6.0, 0.0, 0.0)));
    }

    #[test]
    fn last_wins_on_duplicate_inserts() {
        let mut t = Track::<Vec3>::default();
        t.insert(0, Vec3::new(0.0, 0.0, 0.0));
        t.insert(5, Vec3::new(999.0, 0.0, 0.0));
        t.insert(5, Vec3::new(5.0, 0.0, 0.0));
        t.insert(10, Vec3::new(10.0, 0.0, 0.0));

        let v = t.sample(5.0).unwrap();
        assert!(approx_v3(v, Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn empty_track_yields_none() {
        let t = Track::<Vec3>::default();
        assert!(t.sample(0.0).is_none());
        assert!(t.last_frame().is_none());
    }
}
