use ahash::HashMap;
use glam::Mat4;

use crate::{
    clip::Clip,
    scene::SceneObject,
    skeleton::{Armature, Bone, BoneId, ConstraintKind, PosePosition},
    storage::Handle,
    transform::Transform,
};

/// Pose every bone from the clip's channels at `frame`. Bones without a
/// channel fall back to their rest transform.
pub fn apply_clip(armature: &mut Armature, clip: &Clip, frame: f32) {
    for bone in armature.bones.iter_mut() {
        let translation = clip
            .sample_translation(&bone.name, frame)
            .unwrap_or(bone.rest.translation);
        let rotation = clip
            .sample_rotation(&bone.name, frame)
            .unwrap_or(bone.rest.rotation);
        bone.pose = Transform::new(translation, rotation);
    }
}

fn local_matrix(armature: &Armature, bone: &Bone) -> Mat4 {
    match armature.pose_position {
        PosePosition::Rest => bone.rest.to_mat4(),
        PosePosition::Pose => bone.pose.to_mat4(),
    }
}

fn world_of(
    armature: &Armature,
    object: Mat4,
    id: BoneId,
    cache: &mut HashMap<BoneId, Mat4>,
) -> Mat4 {
    if let Some(world) = cache.get(&id) {
        return *world;
    }

    let bone = armature.bone(id).expect("bone id from own armature");
    let parent_world = match bone.parent {
        Some(parent) => world_of(armature, object, parent, cache),
        None => object,
    };

    let world = parent_world * local_matrix(armature, bone);
    cache.insert(id, world);
    world
}

/// World transform of every bone: world = parent world ∘ local, the root's
/// parent transform being the object's world transform. Bone order in the
/// armature is not topological, hence the memoized walk.
pub fn world_transforms(armature: &Armature, object: Mat4) -> HashMap<BoneId, Mat4> {
    let mut cache = HashMap::default();
    for bone in armature.bones.iter() {
        world_of(armature, object, bone.id, &mut cache);
    }
    cache
}

/// Same as [world_transforms], keyed by bone name for cross-armature lookup.
pub fn world_transforms_by_name(armature: &Armature, object: Mat4) -> HashMap<String, Mat4> {
    let worlds = world_transforms(armature, object);
    armature
        .bones
        .iter()
        .map(|bone| (bone.name.clone(), worlds[&bone.id]))
        .collect()
}

fn constrained_world_of(
    armature: &Armature,
    object: Mat4,
    target_object: Handle<SceneObject>,
    target_worlds: &HashMap<String, Mat4>,
    id: BoneId,
    cache: &mut HashMap<BoneId, Mat4>,
) -> Mat4 {
    if let Some(world) = cache.get(&id) {
        return *world;
    }

    let bone = armature.bone(id).expect("bone id from own armature");
    let parent_world = match bone.parent {
        Some(parent) => {
            constrained_world_of(armature, object, target_object, target_worlds, parent, cache)
        }
        None => object,
    };

    let mut world = Transform::from_mat4(parent_world * local_matrix(armature, bone));

    for constraint in bone.constraints.iter() {
        if constraint.target != target_object {
            tracing::warn!(
                bone = %bone.name,
                "Skipping constraint with unresolved target object"
            );
            continue;
        }
        let Some(target_world) = target_worlds.get(&constraint.subtarget) else {
            tracing::warn!(
                bone = %bone.name,
                subtarget = %constraint.subtarget,
                "Skipping constraint with missing subtarget bone"
            );
            continue;
        };
        let target = Transform::from_mat4(*target_world);
        let n = constraint.influence.clamp(0.0, 1.0);

        match constraint.kind {
            ConstraintKind::CopyRotation => {
                world.rotation = world.rotation.slerp(target.rotation, n);
            }
            ConstraintKind::CopyLocation => {
                world.translation = world.translation.lerp(target.translation, n);
            }
        }
    }

    let world = world.to_mat4();
    cache.insert(id, world);
    world
}

/// World transforms with copy constraints resolved against another
/// armature's (already evaluated) world transforms. Children inherit their
/// parent's constrained placement.
pub fn constrained_world_transforms(
    armature: &Armature,
    object: Mat4,
    target_object: Handle<SceneObject>,
    target_worlds: &HashMap<String, Mat4>,
) -> HashMap<BoneId, Mat4> {
    let mut cache = HashMap::default();
    for bone in armature.bones.iter() {
        constrained_world_of(
            armature,
            object,
            target_object,
            target_worlds,
            bone.id,
            &mut cache,
        );
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scene::Scene,
        skeleton::{Constraint, Mode},
    };
    use glam::{Quat, Vec3};

    #[inline]
    fn approx_v3(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn chain_composes_through_parents() {
        let mut scene = Scene::default();
        let rig = scene.add_armature("rig");
        scene.add_bone(rig, "root", None, Transform::from_translation(Vec3::Y));
        scene.add_bone(rig, "tip", Some("root"), Transform::from_translation(Vec3::Y));

        let armature = scene.armature(rig).unwrap();
        let worlds = world_transforms_by_name(armature, Mat4::IDENTITY);

        let tip = worlds["tip"].to_scale_rotation_translation().2;
        assert!(approx_v3(tip, Vec3::new(0.0, 2.0, 0.0)));
    }

    #[test]
    fn rest_position_ignores_pose() {
        let mut scene = Scene::default();
        let rig = scene.add_armature("rig");
        scene.add_bone(rig, "root", None, Transform::IDENTITY);

        let armature = scene.armature(rig).unwrap();
        let root = armature.bone_id_by_name("root").unwrap();

        let armature = scene.armature_mut(rig).unwrap();
        armature.bone_mut(root).unwrap().pose = Transform::from_translation(Vec3::X * 5.0);

        armature.pose_position = PosePosition::Rest;
        let rest = world_transforms(armature, Mat4::IDENTITY)[&root];
        assert!(approx_v3(rest.to_scale_rotation_translation().2, Vec3::ZERO));

        let armature = scene.armature_mut(rig).unwrap();
        armature.pose_position = PosePosition::Pose;
        let posed = world_transforms(armature, Mat4::IDENTITY)[&root];
        assert!(approx_v3(
            posed.to_scale_rotation_translation().2,
            Vec3::X * 5.0
        ));
    }

    #[test]
    fn apply_clip_falls_back_to_rest() {
        let mut scene = Scene::default();
        let rig = scene.add_armature("rig");
        scene.add_bone(rig, "root", None, Transform::from_translation(Vec3::Y));
        scene.add_bone(rig, "loose", None, Transform::from_translation(Vec3::Z));

        let mut clip = Clip::new("walk");
        clip.insert_translation_key("root", 0, Vec3::X);

        let armature = scene.armature_mut(rig).unwrap();
        apply_clip(armature, &clip, 0.0);

        assert!(approx_v3(
            armature.bone_by_name("root").unwrap().pose.translation,
            Vec3::X
        ));
        assert!(approx_v3(
            armature.bone_by_name("loose").unwrap().pose.translation,
            Vec3::Z
        ));
    }

    #[test]
    fn copy_constraints_override_world_components() {
        let mut scene = Scene::default();
        let driver = scene.add_armature("driver");
        let driven = scene.add_armature("driven");

        scene.add_bone(driver, "root", None, Transform::IDENTITY);
        scene.add_bone(driven, "root", None, Transform::IDENTITY);

        let armature = scene.armature_mut(driver).unwrap();
        armature.bone_mut(armature.bone_id_by_name("root").unwrap()).unwrap().pose =
            Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_z(1.0));

        let driver_worlds =
            world_transforms_by_name(scene.armature(driver).unwrap(), Mat4::IDENTITY);

        let armature = scene.armature_mut(driven).unwrap();
        armature.mode = Mode::Pose;
        let root = armature.bone_id_by_name("root").unwrap();
        for kind in [ConstraintKind::CopyRotation, ConstraintKind::CopyLocation] {
            armature.bone_mut(root).unwrap().constraints.push(Constraint {
                kind,
                target: driver,
                subtarget: "root".to_string(),
                influence: 1.0,
            });
        }

        let worlds = constrained_world_transforms(
            scene.armature(driven).unwrap(),
            Mat4::IDENTITY,
            driver,
            &driver_worlds,
        );
        let world = Transform::from_mat4(worlds[&root]);

        assert!(approx_v3(world.translation, Vec3::new(1.0, 2.0, 3.0)));
        assert!(world.rotation.dot(Quat::from_rotation_z(1.0)).abs() > 1.0 - 1e-4);
    }
}
