use ahash::{HashMap, HashSet};
use glam::Vec3;

use crate::{
    pose,
    scene::{Scene, SceneObject},
    storage::Handle,
};

/// Suffix given to source bones whose name collides with a target bone.
pub const SOURCE_SUFFIX: &str = "_src";

/// The resolved mapping between the two skeletons. Built once per transfer,
/// immutable afterwards.
#[derive(Debug, Default)]
pub struct Correspondence {
    /// target bone name -> source bone name (post-rename).
    pub map: HashMap<String, String>,
    /// Source bones consumed by a correspondence.
    pub claimed: HashSet<String>,
    /// Collision renames applied to source bones (old -> new), needed later
    /// to patch clip channel paths.
    pub renames: Vec<(String, String)>,
}

fn blacklist_segments(blacklist: &str) -> Vec<&str> {
    // Empty segments would blacklist everything; drop them.
    blacklist.split(',').filter(|s| !s.is_empty()).collect()
}

fn head_positions(scene: &Scene, object: Handle<SceneObject>) -> Vec<(String, Vec3)> {
    let Some(obj) = scene.objects.get(object) else {
        return Vec::default();
    };
    let Some(armature) = obj.armature() else {
        return Vec::default();
    };

    let worlds = pose::world_transforms(armature, obj.transform.to_mat4());
    armature
        .bones
        .iter()
        .map(|bone| {
            let head = worlds[&bone.id].to_scale_rotation_translation().2;
            (bone.name.clone(), head)
        })
        .collect()
}

/// Compute the target -> source bone correspondence.
///
/// Colliding source bones are renamed with [SOURCE_SUFFIX] first and matched
/// by name; remaining target bones are matched to the nearest source bone
/// head strictly within `search_radius` (`None` = unbounded), skipping
/// target bones whose name contains a blacklist substring. A source bone is
/// claimed by at most one target bone; the first claimant wins.
pub fn resolve(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    target: Handle<SceneObject>,
    search_radius: Option<f32>,
    blacklist: &str,
) -> Correspondence {
    let mut correspondence = Correspondence::default();

    let target_names: Vec<String> = scene
        .armature(target)
        .map(|armature| armature.bone_names().map(str::to_string).collect())
        .unwrap_or_default();
    let target_heads = head_positions(scene, target);

    // Same-name pass: rename collisions out of the way and pair them up.
    if let Some(armature) = scene.armature_mut(source) {
        let colliding: Vec<_> = armature
            .bones
            .iter()
            .filter(|bone| target_names.iter().any(|name| *name == bone.name))
            .map(|bone| (bone.id, bone.name.clone()))
            .collect();

        for (id, original) in colliding {
            let renamed = format!("{original}{SOURCE_SUFFIX}");
            armature.rename_bone(id, renamed.clone());
            correspondence
                .renames
                .push((original.clone(), renamed.clone()));
            correspondence.map.insert(original, renamed.clone());
            correspondence.claimed.insert(renamed);
        }
    }

    // Proximity pass over whatever the name pass left unmapped.
    let source_heads = head_positions(scene, source);
    let blacklist = blacklist_segments(blacklist);

    for (target_name, target_head) in target_heads {
        if correspondence.map.contains_key(&target_name) {
            continue;
        }
        if blacklist.iter().any(|segment| target_name.contains(segment)) {
            continue;
        }

        let mut best: Option<(&str, f32)> = None;
        for (source_name, source_head) in source_heads.iter() {
            if correspondence.claimed.contains(source_name) {
                continue;
            }
            let distance = (*source_head - target_head).length();
            if search_radius.is_some_and(|radius| distance >= radius) {
                continue;
            }
            // Strictly-less keeps the first encountered bone on ties.
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((source_name, distance));
            }
        }

        if let Some((source_name, distance)) = best {
            tracing::debug!(
                target_bone = %target_name,
                source_bone = source_name,
                distance,
                "Proximity correspondence"
            );
            correspondence.claimed.insert(source_name.to_string());
            correspondence.map.insert(target_name, source_name.to_string());
        }
    }

    tracing::info!(
        mapped = correspondence.map.len(),
        claimed = correspondence.claimed.len(),
        renamed = correspondence.renames.len(),
        "Resolved bone correspondence"
    );

    correspondence
}
