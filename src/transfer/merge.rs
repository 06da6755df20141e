use ahash::HashMap;

use crate::{
    scene::{Scene, SceneObject},
    skeleton::Mode,
    storage::Handle,
};

use super::correspondence::{Correspondence, SOURCE_SUFFIX};

/// Parent of every target bone ("none" recorded as `None`), captured before
/// any merge mutation. This is the ground truth the final skeleton's
/// hierarchy is restored to.
pub type OriginalParentMap = HashMap<String, Option<String>>;

pub fn capture_original_parents(
    scene: &Scene,
    target: Handle<SceneObject>,
) -> OriginalParentMap {
    let Some(armature) = scene.armature(target) else {
        return OriginalParentMap::default();
    };

    armature
        .bones
        .iter()
        .map(|bone| {
            let parent = bone
                .parent
                .and_then(|id| armature.bone(id))
                .map(|parent| parent.name.clone());
            (bone.name.clone(), parent)
        })
        .collect()
}

/// Merge steps 1-4: rebind target meshes to the source, snapshot the target
/// pose as rest, fold a duplicate of the target into the source, empty the
/// target, and reparent the folded-in bones onto their correspondents.
pub fn prepare(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    target: Handle<SceneObject>,
    correspondence: &Correspondence,
) {
    // 1. Meshes deformed by the target now ride the source; the current
    // binding is folded in as a static baseline first since the bind pose is
    // about to change.
    for mesh in scene.meshes_bound_to(target) {
        if let Some(binding) = scene.objects.get_mut(mesh).and_then(SceneObject::mesh_mut) {
            binding.baseline_applied = true;
            binding.armature = Some(source);
        }
    }

    // 2. Snapshot the target's pose as its rest pose, then fold a duplicate
    // of its bone graph into the source.
    scene.set_mode(target, Mode::Pose);
    if let Some(armature) = scene.armature_mut(target) {
        armature.apply_pose_as_rest();
    }

    let source_world = scene
        .objects
        .get(source)
        .expect("validated source armature")
        .transform
        .to_mat4();
    let target_world = scene
        .objects
        .get(target)
        .expect("validated target armature")
        .transform
        .to_mat4();

    let duplicate = {
        let armature = scene
            .objects
            .get(target)
            .and_then(SceneObject::armature)
            .expect("validated target armature");
        armature.duplicated(&mut scene.bone_ids)
    };

    scene.set_mode(source, Mode::Edit);
    if let Some(armature) = scene.armature_mut(source) {
        armature.join(duplicate, source_world, target_world);
    }

    // 3. The target becomes an empty shell, repopulated later as the final
    // skeleton.
    scene.set_mode(target, Mode::Edit);
    if let Some(armature) = scene.armature_mut(target) {
        armature.strip_bones();
    }

    // 4. Inside the merged source, hang every correspondence key under its
    // mapped bone. Missing names are a tolerated partial failure.
    if let Some(armature) = scene.armature_mut(source) {
        for (target_name, source_name) in correspondence.map.iter() {
            let child = armature.bone_id_by_name(target_name);
            let parent = armature.bone_id_by_name(source_name);
            match (child, parent) {
                (Some(child), Some(parent)) => armature.set_parent(child, Some(parent)),
                _ => tracing::warn!(
                    bone = %target_name,
                    parent = %source_name,
                    "Skipping correspondence reparent, bone missing"
                ),
            }
        }
    }
}

/// Merge step 5: rewrite clip channel paths for every collision rename so
/// baked data reads the renamed bones.
pub fn patch_clip_paths(scene: &mut Scene, renames: &[(String, String)]) {
    for (_, clip) in scene.clips.iter_mut() {
        for (old, new) in renames {
            clip.retarget_channels(old, new);
        }
    }
}

/// Merge steps 6-8: duplicate the merged source into the emptied target
/// (which becomes the final skeleton), restore the original target
/// hierarchy, and delete the bones the cleanup policy claims.
pub fn finalize(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    target: Handle<SceneObject>,
    correspondence: &Correspondence,
    original_parents: &OriginalParentMap,
    clean_transfer: bool,
) {
    // 6. Bone graph only; no animation reference, no constraints.
    let source_world = scene
        .objects
        .get(source)
        .expect("validated source armature")
        .transform
        .to_mat4();
    let target_world = scene
        .objects
        .get(target)
        .expect("validated target armature")
        .transform
        .to_mat4();

    let duplicate = scene
        .objects
        .get(source)
        .and_then(SceneObject::armature)
        .expect("validated source armature")
        .duplicated(&mut scene.bone_ids);

    scene.set_mode(target, Mode::Edit);
    let Some(armature) = scene.armature_mut(target) else {
        return;
    };
    armature.join(duplicate, target_world, source_world);

    // Re-hang children of suffixed bones onto the base-named bone where one
    // exists, so unclaimed source bones stay attached once the suffixed
    // bones are deleted below.
    let rehangs: Vec<_> = armature
        .bones
        .iter()
        .filter_map(|bone| {
            let parent = bone.parent.and_then(|id| armature.bone(id))?;
            let base = parent.name.strip_suffix(SOURCE_SUFFIX)?;
            if base == bone.name {
                return None;
            }
            let base = armature.bone_id_by_name(base)?;
            Some((bone.id, base))
        })
        .collect();
    for (bone, parent) in rehangs {
        armature.set_parent(bone, Some(parent));
    }

    // 7. Restore the pre-merge target topology. Missing bones or parents are
    // skipped; the bone keeps its interim parent.
    for (bone_name, parent_name) in original_parents.iter() {
        let Some(bone) = armature.bone_id_by_name(bone_name) else {
            tracing::warn!(bone = %bone_name, "Skipping hierarchy restore, bone missing");
            continue;
        };
        match parent_name {
            Some(parent_name) => match armature.bone_id_by_name(parent_name) {
                Some(parent) => armature.set_parent(bone, Some(parent)),
                None => tracing::warn!(
                    bone = %bone_name,
                    parent = %parent_name,
                    "Skipping hierarchy restore, parent missing"
                ),
            },
            None => armature.set_parent(bone, None),
        }
    }

    // 8. Cleanup policy: a clean transfer keeps exactly the original target
    // bone set; otherwise only the claimed source bones go.
    let doomed: Vec<_> = armature
        .bones
        .iter()
        .filter(|bone| {
            if clean_transfer {
                !original_parents.contains_key(&bone.name)
            } else {
                correspondence.claimed.contains(&bone.name)
            }
        })
        .map(|bone| bone.id)
        .collect();
    for id in doomed {
        armature.remove_bone(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        transfer::correspondence::resolve,
        transform::Transform,
    };
    use glam::Vec3;

    fn two_rigs(scene: &mut Scene) -> (Handle<SceneObject>, Handle<SceneObject>) {
        let source = scene.add_armature("mocap");
        let target = scene.add_armature("production");

        scene.add_bone(source, "Root", None, Transform::IDENTITY);
        scene.add_bone(
            source,
            "Spine",
            Some("Root"),
            Transform::from_translation(Vec3::Y),
        );
        scene.add_bone(
            source,
            "Head",
            Some("Spine"),
            Transform::from_translation(Vec3::Y),
        );

        scene.add_bone(target, "Root", None, Transform::IDENTITY);
        scene.add_bone(
            target,
            "Spine",
            Some("Root"),
            Transform::from_translation(Vec3::Y),
        );

        (source, target)
    }

    fn run_merge(scene: &mut Scene, clean_transfer: bool) -> Handle<SceneObject> {
        let (source, target) = two_rigs(scene);
        let original_parents = capture_original_parents(scene, target);
        let correspondence = resolve(scene, source, target, Some(0.5), "");

        prepare(scene, source, target, &correspondence);
        patch_clip_paths(scene, &correspondence.renames);
        finalize(
            scene,
            source,
            target,
            &correspondence,
            &original_parents,
            clean_transfer,
        );

        target
    }

    #[test]
    fn dirty_transfer_keeps_unclaimed_source_bones() {
        let mut scene = Scene::default();
        let target = run_merge(&mut scene, false);

        let armature = scene.armature(target).unwrap();
        let mut names: Vec<_> = armature.bone_names().collect();
        names.sort_unstable();
        assert_eq!(names, ["Head", "Root", "Spine"]);

        // Head re-hung under the surviving Spine instead of dangling off the
        // deleted Spine_src.
        let head = armature.bone_by_name("Head").unwrap();
        assert_eq!(
            head.parent,
            Some(armature.bone_id_by_name("Spine").unwrap())
        );
    }

    #[test]
    fn clean_transfer_keeps_exactly_the_target_bone_set() {
        let mut scene = Scene::default();
        let target = run_merge(&mut scene, true);

        let armature = scene.armature(target).unwrap();
        let mut names: Vec<_> = armature.bone_names().collect();
        names.sort_unstable();
        assert_eq!(names, ["Root", "Spine"]);
    }

    #[test]
    fn hierarchy_is_restored_to_the_original_parents() {
        let mut scene = Scene::default();
        let target = run_merge(&mut scene, false);

        let armature = scene.armature(target).unwrap();
        let root = armature.bone_by_name("Root").unwrap();
        let spine = armature.bone_by_name("Spine").unwrap();

        assert_eq!(root.parent, None);
        assert_eq!(spine.parent, Some(root.id));
    }

    #[test]
    fn prepare_rebinds_target_meshes_to_source() {
        let mut scene = Scene::default();
        let (source, target) = two_rigs(&mut scene);
        let mesh = scene.add_mesh("body", Some(target));

        let correspondence = resolve(&mut scene, source, target, Some(0.5), "");
        prepare(&mut scene, source, target, &correspondence);

        let binding = scene.objects.get(mesh).unwrap().mesh().unwrap();
        assert_eq!(binding.armature, Some(source));
        assert!(binding.baseline_applied);
    }

    #[test]
    fn clip_paths_follow_collision_renames() {
        let mut scene = Scene::default();
        let (source, target) = two_rigs(&mut scene);

        let walk = scene.clips.create("walk");
        scene
            .clips
            .get_mut(walk)
            .unwrap()
            .insert_translation_key("Spine", 0, Vec3::X);

        let correspondence = resolve(&mut scene, source, target, Some(0.5), "");
        patch_clip_paths(&mut scene, &correspondence.renames);

        let clip = scene.clips.get(walk).unwrap();
        assert!(clip.sample_translation("Spine", 0.0).is_none());
        assert!(clip.sample_translation("Spine_src", 0.0).is_some());
    }
}
