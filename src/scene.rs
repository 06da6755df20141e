use crate::{
    clip::{Clip, ClipStore},
    skeleton::{Armature, BoneId, BoneIdAlloc, Mode, PosePosition},
    storage::{Handle, Storage},
    transform::Transform,
};

/// The armature-deformation binding of a mesh object.
#[derive(Clone, Debug, Default)]
pub struct MeshBinding {
    pub armature: Option<Handle<SceneObject>>,
    /// Set once the current binding has been folded into the mesh data as a
    /// static baseline. The vertex fold itself is the host's job; the core
    /// only records that it happened.
    pub baseline_applied: bool,
}

pub enum ObjectData {
    Armature(Armature),
    Mesh(MeshBinding),
}

pub struct SceneObject {
    pub name: String,
    /// Object-level world transform.
    pub transform: Transform,
    pub parent: Option<Handle<SceneObject>>,
    pub selected: bool,
    pub active_clip: Option<Handle<Clip>>,
    pub data: ObjectData,
}

impl SceneObject {
    pub fn is_armature(&self) -> bool {
        matches!(self.data, ObjectData::Armature(_))
    }

    pub fn armature(&self) -> Option<&Armature> {
        match self.data {
            ObjectData::Armature(ref armature) => Some(armature),
            ObjectData::Mesh(_) => None,
        }
    }

    pub fn armature_mut(&mut self) -> Option<&mut Armature> {
        match self.data {
            ObjectData::Armature(ref mut armature) => Some(armature),
            ObjectData::Mesh(_) => None,
        }
    }

    pub fn mesh(&self) -> Option<&MeshBinding> {
        match self.data {
            ObjectData::Mesh(ref binding) => Some(binding),
            ObjectData::Armature(_) => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut MeshBinding> {
        match self.data {
            ObjectData::Mesh(ref mut binding) => Some(binding),
            ObjectData::Armature(_) => None,
        }
    }
}

/// Owns every object and clip for the lifetime of the scene.
#[derive(Default)]
pub struct Scene {
    pub objects: Storage<SceneObject>,
    pub clips: ClipStore,
    pub active: Option<Handle<SceneObject>>,
    pub bone_ids: BoneIdAlloc,
}

impl Scene {
    pub fn add_armature(&mut self, name: impl Into<String>) -> Handle<SceneObject> {
        self.objects.insert(SceneObject {
            name: name.into(),
            transform: Transform::IDENTITY,
            parent: None,
            selected: false,
            active_clip: None,
            data: ObjectData::Armature(Armature::default()),
        })
    }

    pub fn add_mesh(
        &mut self,
        name: impl Into<String>,
        bound_to: Option<Handle<SceneObject>>,
    ) -> Handle<SceneObject> {
        self.objects.insert(SceneObject {
            name: name.into(),
            transform: Transform::IDENTITY,
            parent: bound_to,
            selected: false,
            active_clip: None,
            data: ObjectData::Mesh(MeshBinding {
                armature: bound_to,
                baseline_applied: false,
            }),
        })
    }

    pub fn armature(&self, handle: Handle<SceneObject>) -> Option<&Armature> {
        self.objects.get(handle).and_then(SceneObject::armature)
    }

    pub fn armature_mut(&mut self, handle: Handle<SceneObject>) -> Option<&mut Armature> {
        self.objects
            .get_mut(handle)
            .and_then(SceneObject::armature_mut)
    }

    /// Convenience for building skeletons: parent is looked up by name.
    pub fn add_bone(
        &mut self,
        object: Handle<SceneObject>,
        name: &str,
        parent: Option<&str>,
        rest: Transform,
    ) -> Option<BoneId> {
        let id = self.bone_ids.next();
        let armature = self.armature_mut(object)?;
        let parent = parent.and_then(|name| armature.bone_id_by_name(name));
        Some(armature.add_bone(id, name, parent, rest))
    }

    pub fn set_active(&mut self, handle: Handle<SceneObject>) {
        self.active = Some(handle);
    }

    pub fn select(&mut self, handle: Handle<SceneObject>, selected: bool) {
        if let Some(object) = self.objects.get_mut(handle) {
            object.selected = selected;
        }
    }

    pub fn set_mode(&mut self, handle: Handle<SceneObject>, mode: Mode) {
        if let Some(armature) = self.armature_mut(handle) {
            armature.mode = mode;
        }
    }

    pub fn set_pose_position(&mut self, handle: Handle<SceneObject>, position: PosePosition) {
        if let Some(armature) = self.armature_mut(handle) {
            armature.pose_position = position;
        }
    }

    /// Every mesh object whose deformation binding targets `skeleton`.
    pub fn meshes_bound_to(&self, skeleton: Handle<SceneObject>) -> Vec<Handle<SceneObject>> {
        self.objects
            .iter()
            .filter(|(_, object)| {
                object
                    .mesh()
                    .is_some_and(|binding| binding.armature == Some(skeleton))
            })
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn rebind_mesh(&mut self, mesh: Handle<SceneObject>, skeleton: Handle<SceneObject>) {
        if let Some(binding) = self.objects.get_mut(mesh).and_then(SceneObject::mesh_mut) {
            binding.armature = Some(skeleton);
        }
    }

    /// Bind (or unbind) an object's active clip, keeping clip user counts in
    /// step with the bindings.
    pub fn set_active_clip(&mut self, object: Handle<SceneObject>, clip: Option<Handle<Clip>>) {
        let Some(obj) = self.objects.get_mut(object) else {
            return;
        };

        let previous = obj.active_clip;
        obj.active_clip = clip;

        if let Some(previous) = previous {
            self.clips.remove_user(previous);
        }
        if let Some(clip) = clip {
            self.clips.add_user(clip);
        }
    }

    /// Delete an object. Its active clip binding is released and any
    /// references from other objects are cleared.
    pub fn remove_object(&mut self, handle: Handle<SceneObject>) {
        self.set_active_clip(handle, None);

        if self.active == Some(handle) {
            self.active = None;
        }

        for (_, object) in self.objects.iter_mut() {
            if object.parent == Some(handle) {
                object.parent = None;
            }
            if let Some(binding) = object.mesh_mut() {
                if binding.armature == Some(handle) {
                    binding.armature = None;
                }
            }
        }

        self.objects.remove(handle);
    }

    pub fn selected_armatures(&self) -> Vec<Handle<SceneObject>> {
        self.objects
            .iter()
            .filter(|(_, object)| object.selected && object.is_armature())
            .map(|(handle, _)| handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_clip_binding_tracks_users() {
        let mut scene = Scene::default();
        let armature = scene.add_armature("rig");
        let clip = scene.clips.create("walk");

        scene.set_active_clip(armature, Some(clip));
        scene.clips.release(clip);
        assert!(scene.clips.get(clip).is_some());

        scene.set_active_clip(armature, None);
        scene.clips.release(clip);
        assert!(scene.clips.get(clip).is_none());
    }

    #[test]
    fn remove_object_clears_references() {
        let mut scene = Scene::default();
        let rig = scene.add_armature("rig");
        let mesh = scene.add_mesh("body", Some(rig));
        let clip = scene.clips.create("walk");
        scene.set_active_clip(rig, Some(clip));
        scene.set_active(rig);

        scene.remove_object(rig);

        assert!(scene.active.is_none());
        let binding = scene.objects.get(mesh).unwrap().mesh().unwrap();
        assert!(binding.armature.is_none());
        scene.clips.release(clip);
        assert!(scene.clips.get(clip).is_none());
    }

    #[test]
    fn meshes_bound_to_filters_by_binding() {
        let mut scene = Scene::default();
        let a = scene.add_armature("a");
        let b = scene.add_armature("b");
        let bound = scene.add_mesh("body", Some(a));
        let _other = scene.add_mesh("prop", Some(b));

        assert_eq!(scene.meshes_bound_to(a), vec![bound]);
    }
}
