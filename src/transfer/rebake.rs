use ahash::HashSet;

use crate::{
    clip::Clip,
    pose,
    scene::{Scene, SceneObject},
    skeleton::{Constraint, ConstraintKind, Mode},
    storage::Handle,
    transform::Transform,
};

use super::TransferError;

/// Prefix given to the pre-transfer clip kept as a recovery backup.
pub const BACKUP_PREFIX: &str = "old_";

/// Rebake every clip in the store onto the final skeleton. Progress is
/// reported over 10..=95, apportioned evenly across clips.
pub fn rebake_all(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    final_skeleton: Handle<SceneObject>,
    progress: &mut dyn FnMut(u32),
) -> Result<usize, TransferError> {
    // Snapshot the distinct clip names up front; the store mutates as we go.
    let names: Vec<String> = scene
        .clips
        .list_all()
        .into_iter()
        .filter_map(|handle| scene.clips.get(handle).map(|clip| clip.name.clone()))
        .collect();
    let count = names.len();

    for (index, name) in names.iter().enumerate() {
        rebake_clip(scene, source, final_skeleton, name)?;
        progress(10 + ((index + 1) as u32 * 85) / count as u32);
    }

    Ok(count)
}

/// Rebake a single clip, all or nothing. Constraints and clip bindings are
/// unwound even when baking fails; the renamed backup clip is not rolled
/// back to its original name (no transactional guarantee), but it survives
/// a failed bake as the recovery copy.
fn rebake_clip(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    final_skeleton: Handle<SceneObject>,
    name: &str,
) -> Result<(), TransferError> {
    let old_clip = scene
        .clips
        .find(name)
        .ok_or_else(|| TransferError::ClipVanished {
            name: name.to_string(),
        })?;

    let frame_end = scene
        .clips
        .get(old_clip)
        .map(Clip::frame_end)
        .unwrap_or(1);

    // Keep the original around as a pinned backup while the bake reads it.
    scene.clips.rename(old_clip, format!("{BACKUP_PREFIX}{name}"));
    scene.clips.pin(old_clip);
    scene.set_active_clip(source, Some(old_clip));

    // Drive every shared-name bone of the final skeleton from the source.
    scene.set_mode(final_skeleton, Mode::Pose);
    let source_names: HashSet<String> = scene
        .armature(source)
        .map(|armature| armature.bone_names().map(str::to_string).collect())
        .unwrap_or_default();

    let mut constrained = 0usize;
    if let Some(armature) = scene.armature_mut(final_skeleton) {
        for bone in armature.bones.iter_mut() {
            if !source_names.contains(&bone.name) {
                continue;
            }
            for kind in [ConstraintKind::CopyRotation, ConstraintKind::CopyLocation] {
                bone.constraints.push(Constraint {
                    kind,
                    target: source,
                    subtarget: bone.name.clone(),
                    influence: 1.0,
                });
            }
            constrained += 1;
        }
    }

    let new_clip = scene.clips.create(name);
    scene.clips.pin(new_clip);
    scene.set_active_clip(final_skeleton, Some(new_clip));

    tracing::debug!(clip = name, frame_end, constrained, "Baking clip");

    let baked = bake_frames(
        scene,
        source,
        final_skeleton,
        old_clip,
        new_clip,
        frame_end,
        name,
    );

    unwind_bake(scene, source, final_skeleton, old_clip, new_clip, baked.is_ok());

    baked
}

/// Tear down the transient bake rig: constraints off, source binding gone.
/// On success the backup is let go (dropped once nothing references it); on
/// failure the backup stays pinned as the recovery copy and the
/// partially-baked clip is dropped instead.
fn unwind_bake(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    final_skeleton: Handle<SceneObject>,
    old_clip: Handle<Clip>,
    new_clip: Handle<Clip>,
    succeeded: bool,
) {
    if let Some(armature) = scene.armature_mut(final_skeleton) {
        armature.clear_constraints();
    }
    scene.set_active_clip(source, None);

    if succeeded {
        scene.clips.unpin(old_clip);
        scene.clips.release(old_clip);
    } else {
        scene.set_active_clip(final_skeleton, None);
        scene.clips.unpin(new_clip);
        scene.clips.release(new_clip);
    }
}

fn bake_frames(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    final_skeleton: Handle<SceneObject>,
    old_clip: Handle<Clip>,
    new_clip: Handle<Clip>,
    frame_end: u32,
    name: &str,
) -> Result<(), TransferError> {
    let source_world = scene
        .objects
        .get(source)
        .expect("validated source armature")
        .transform
        .to_mat4();
    let final_world = scene
        .objects
        .get(final_skeleton)
        .expect("validated final armature")
        .transform
        .to_mat4();

    for frame in 0..=frame_end {
        // One evaluation pass per frame services every bone and constraint.
        {
            let clip = scene
                .clips
                .get(old_clip)
                .ok_or_else(|| TransferError::ClipVanished {
                    name: format!("{BACKUP_PREFIX}{name}"),
                })?;
            let armature = scene
                .objects
                .get_mut(source)
                .and_then(SceneObject::armature_mut)
                .expect("validated source armature");
            pose::apply_clip(armature, clip, frame as f32);
        }

        let source_armature = scene
            .objects
            .get(source)
            .and_then(SceneObject::armature)
            .expect("validated source armature");
        let source_worlds = pose::world_transforms_by_name(source_armature, source_world);

        let final_armature = scene
            .objects
            .get(final_skeleton)
            .and_then(SceneObject::armature)
            .expect("validated final armature");
        let worlds = pose::constrained_world_transforms(
            final_armature,
            final_world,
            source,
            &source_worlds,
        );

        // Record the constraint-driven result as plain local keyframes.
        let keys: Vec<(String, Transform)> = final_armature
            .bones
            .iter()
            .map(|bone| {
                let parent_world = bone
                    .parent
                    .map(|parent| worlds[&parent])
                    .unwrap_or(final_world);
                let local = Transform::from_mat4(parent_world.inverse() * worlds[&bone.id]);
                (bone.name.clone(), local)
            })
            .collect();

        let clip = scene
            .clips
            .get_mut(new_clip)
            .ok_or_else(|| TransferError::ClipVanished {
                name: name.to_string(),
            })?;
        for (bone, local) in keys {
            clip.insert_translation_key(&bone, frame, local.translation);
            clip.insert_rotation_key(&bone, frame, local.rotation);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Transform;
    use glam::Quat;

    /// Scene frozen mid-bake: backup renamed and pinned, source driving it,
    /// constraints rigged, partial new clip pinned and bound to the final
    /// skeleton.
    fn mid_bake_scene() -> (
        Scene,
        Handle<SceneObject>,
        Handle<SceneObject>,
        Handle<Clip>,
        Handle<Clip>,
    ) {
        let mut scene = Scene::default();
        let source = scene.add_armature("mocap");
        let final_skeleton = scene.add_armature("production");
        scene.add_bone(source, "Root", None, Transform::IDENTITY);
        scene.add_bone(final_skeleton, "Root", None, Transform::IDENTITY);

        let mut backup = Clip::new("old_walk");
        backup.insert_rotation_key("Root", 0, Quat::IDENTITY);
        let old_clip = scene.clips.insert(backup);
        scene.clips.pin(old_clip);
        scene.set_active_clip(source, Some(old_clip));

        scene.set_mode(final_skeleton, Mode::Pose);
        if let Some(armature) = scene.armature_mut(final_skeleton) {
            let root = armature.bone_id_by_name("Root").unwrap();
            for kind in [ConstraintKind::CopyRotation, ConstraintKind::CopyLocation] {
                armature.bone_mut(root).unwrap().constraints.push(Constraint {
                    kind,
                    target: source,
                    subtarget: "Root".to_string(),
                    influence: 1.0,
                });
            }
        }

        let new_clip = scene.clips.create("walk");
        scene.clips.pin(new_clip);
        scene.set_active_clip(final_skeleton, Some(new_clip));

        (scene, source, final_skeleton, old_clip, new_clip)
    }

    #[test]
    fn successful_bake_releases_the_backup() {
        let (mut scene, source, final_skeleton, old_clip, new_clip) = mid_bake_scene();

        unwind_bake(&mut scene, source, final_skeleton, old_clip, new_clip, true);

        // The backup had no other users and goes away; the baked clip stays
        // bound under the original name.
        assert!(scene.clips.find("old_walk").is_none());
        assert!(scene.clips.find("walk").is_some());
        assert_eq!(
            scene.objects.get(final_skeleton).unwrap().active_clip,
            Some(new_clip)
        );
        assert!(scene.objects.get(source).unwrap().active_clip.is_none());

        let armature = scene.armature(final_skeleton).unwrap();
        assert!(armature.bones.iter().all(|bone| bone.constraints.is_empty()));
    }

    #[test]
    fn failed_bake_keeps_the_backup_and_drops_the_partial_clip() {
        let (mut scene, source, final_skeleton, old_clip, new_clip) = mid_bake_scene();

        unwind_bake(&mut scene, source, final_skeleton, old_clip, new_clip, false);

        // The recovery copy survives, still pinned against collection; the
        // half-baked clip is unbound and collected.
        assert_eq!(scene.clips.find("old_walk"), Some(old_clip));
        scene.clips.release(old_clip);
        assert!(scene.clips.get(old_clip).is_some());

        assert!(scene.clips.find("walk").is_none());
        assert!(scene.objects.get(final_skeleton).unwrap().active_clip.is_none());
        assert!(scene.objects.get(source).unwrap().active_clip.is_none());

        let armature = scene.armature(final_skeleton).unwrap();
        assert!(armature.bones.iter().all(|bone| bone.constraints.is_empty()));
    }
}
