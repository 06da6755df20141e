use glam::Mat4;

use crate::{scene::SceneObject, storage::Handle, transform::Transform};

/// Stable identity of a bone, allocated once at creation. Survives renames
/// and moves between armatures; never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoneId(u32);

#[derive(Default)]
pub struct BoneIdAlloc {
    next: u32,
}

impl BoneIdAlloc {
    pub fn next(&mut self) -> BoneId {
        let id = BoneId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    CopyRotation,
    CopyLocation,
}

/// A transient copy-transform constraint on a pose bone, targeting a bone of
/// another armature object by name.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub target: Handle<SceneObject>,
    pub subtarget: String,
    pub influence: f32,
}

#[derive(Clone, Debug)]
pub struct Bone {
    pub id: BoneId,
    pub name: String,
    pub parent: Option<BoneId>,
    /// Parent-relative rest transform.
    pub rest: Transform,
    /// Parent-relative animated transform, read in [PosePosition::Pose].
    pub pose: Transform,
    pub constraints: Vec<Constraint>,
}

/// Which transforms world evaluation reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PosePosition {
    Rest,
    Pose,
}

/// Host interaction mode. Structural edits require [Mode::Edit], constraint
/// and pose mutations require [Mode::Pose].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Object,
    Pose,
    Edit,
}

pub struct Armature {
    pub bones: Vec<Bone>,
    pub pose_position: PosePosition,
    pub mode: Mode,
}

impl Default for Armature {
    fn default() -> Self {
        Self {
            bones: Vec::default(),
            pose_position: PosePosition::Pose,
            mode: Mode::Object,
        }
    }
}

impl Armature {
    pub fn bone(&self, id: BoneId) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.id == id)
    }

    pub fn bone_mut(&mut self, id: BoneId) -> Option<&mut Bone> {
        self.bones.iter_mut().find(|bone| bone.id == id)
    }

    pub fn bone_by_name(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    pub fn bone_id_by_name(&self, name: &str) -> Option<BoneId> {
        self.bone_by_name(name).map(|bone| bone.id)
    }

    pub fn has_bone(&self, name: &str) -> bool {
        self.bone_by_name(name).is_some()
    }

    pub fn bone_names(&self) -> impl Iterator<Item = &str> {
        self.bones.iter().map(|bone| bone.name.as_str())
    }

    pub fn add_bone(
        &mut self,
        id: BoneId,
        name: impl Into<String>,
        parent: Option<BoneId>,
        rest: Transform,
    ) -> BoneId {
        let name = name.into();
        debug_assert!(!self.has_bone(&name), "duplicate bone name: {name}");

        self.bones.push(Bone {
            id,
            name,
            parent,
            rest,
            pose: rest,
            constraints: Vec::default(),
        });

        id
    }

    pub fn rename_bone(&mut self, id: BoneId, new_name: impl Into<String>) {
        let new_name = new_name.into();
        debug_assert!(
            self.bone_id_by_name(&new_name).is_none_or(|other| other == id),
            "duplicate bone name: {new_name}"
        );

        if let Some(bone) = self.bone_mut(id) {
            bone.name = new_name;
        }
    }

    /// Armature-space rest transform of a bone, composed through its parent
    /// chain.
    pub fn rest_world(&self, id: BoneId) -> Option<Mat4> {
        let bone = self.bone(id)?;
        let local = bone.rest.to_mat4();
        match bone.parent {
            Some(parent) => Some(self.rest_world(parent)? * local),
            None => Some(local),
        }
    }

    /// Re-parent a bone, keeping its armature-space rest placement (the
    /// parent-relative rest transform is recomputed). Refuses to introduce a
    /// cycle; the bone keeps its current parent in that case.
    pub fn set_parent(&mut self, id: BoneId, parent: Option<BoneId>) {
        debug_assert_eq!(self.mode, Mode::Edit, "reparenting requires edit mode");

        if let Some(parent_id) = parent {
            // Walk the would-be ancestor chain.
            let mut walk = Some(parent_id);
            while let Some(current) = walk {
                if current == id {
                    tracing::warn!(
                        bone = ?self.bone(id).map(|b| b.name.as_str()),
                        "Skipping reparent that would introduce a cycle"
                    );
                    return;
                }
                walk = self.bone(current).and_then(|bone| bone.parent);
            }
        }

        let Some(world) = self.rest_world(id) else {
            return;
        };
        let parent_world = parent
            .and_then(|parent| self.rest_world(parent))
            .unwrap_or(Mat4::IDENTITY);
        let rest = Transform::from_mat4(parent_world.inverse() * world);

        if let Some(bone) = self.bone_mut(id) {
            bone.parent = parent;
            bone.rest = rest;
            bone.pose = rest;
        }
    }

    /// Remove a bone. Its children are re-parented to the removed bone's
    /// parent, keeping their armature-space placement, so the bone graph
    /// stays a forest.
    pub fn remove_bone(&mut self, id: BoneId) {
        debug_assert_eq!(self.mode, Mode::Edit, "removing bones requires edit mode");

        let Some(index) = self.bones.iter().position(|bone| bone.id == id) else {
            return;
        };
        let parent = self.bones[index].parent;
        let removed_rest = self.bones[index].rest.to_mat4();
        let removed_pose = self.bones[index].pose.to_mat4();

        for bone in self.bones.iter_mut() {
            if bone.parent == Some(id) {
                bone.parent = parent;
                bone.rest = Transform::from_mat4(removed_rest * bone.rest.to_mat4());
                bone.pose = Transform::from_mat4(removed_pose * bone.pose.to_mat4());
            }
        }

        self.bones.remove(index);
    }

    /// Strip every bone, leaving an empty shell.
    pub fn strip_bones(&mut self) {
        debug_assert_eq!(self.mode, Mode::Edit, "stripping bones requires edit mode");
        self.bones.clear();
    }

    /// Snapshot the current pose as the new rest pose.
    pub fn apply_pose_as_rest(&mut self) {
        debug_assert_eq!(self.mode, Mode::Pose, "applying pose requires pose mode");
        for bone in self.bones.iter_mut() {
            bone.rest = bone.pose;
        }
    }

    pub fn clear_constraints(&mut self) {
        for bone in self.bones.iter_mut() {
            bone.constraints.clear();
        }
    }

    /// Duplicate the bone graph: fresh ids, same names and rest transforms.
    /// Animation state and constraints are not carried over.
    pub fn duplicated(&self, ids: &mut BoneIdAlloc) -> Armature {
        let mut id_map = ahash::HashMap::default();
        for bone in self.bones.iter() {
            id_map.insert(bone.id, ids.next());
        }

        Armature {
            bones: self
                .bones
                .iter()
                .map(|bone| Bone {
                    id: id_map[&bone.id],
                    name: bone.name.clone(),
                    parent: bone.parent.map(|parent| id_map[&parent]),
                    rest: bone.rest,
                    pose: bone.rest,
                    constraints: Vec::default(),
                })
                .collect(),
            pose_position: self.pose_position,
            mode: Mode::Object,
        }
    }

    /// Fold another armature's bones into this one. Root bones of `other`
    /// have their rest transforms re-expressed in this armature's object
    /// space so their world placement is preserved.
    pub fn join(&mut self, other: Armature, self_world: Mat4, other_world: Mat4) {
        debug_assert_eq!(self.mode, Mode::Edit, "joining requires edit mode");

        let into_self_space = self_world.inverse() * other_world;

        for mut bone in other.bones {
            debug_assert!(!self.has_bone(&bone.name), "joining duplicate bone name");

            if bone.parent.is_none() {
                bone.rest = Transform::from_mat4(into_self_space * bone.rest.to_mat4());
            }
            bone.pose = bone.rest;
            bone.constraints.clear();
            self.bones.push(bone);
        }
    }
}
