mod correspondence;
mod merge;
mod rebake;

pub use correspondence::{Correspondence, SOURCE_SUFFIX, resolve};
pub use merge::{OriginalParentMap, capture_original_parents};
pub use rebake::BACKUP_PREFIX;

use crate::{
    scene::{Scene, SceneObject},
    skeleton::{Mode, PosePosition},
    storage::Handle,
};

#[derive(Clone, Debug)]
pub struct TransferOptions {
    /// Strict upper bound on the proximity search distance. `None` means
    /// unbounded.
    pub search_radius: Option<f32>,
    /// Comma-separated substrings; target bones containing any of them are
    /// excluded from the proximity search.
    pub search_blacklist: String,
    /// When set, the final skeleton keeps exactly the original target bone
    /// set; otherwise unclaimed source bones survive.
    pub clean_transfer: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            search_radius: Some(1.0),
            search_blacklist: "dummy".to_string(),
            clean_transfer: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("no active object to use as the transfer target")]
    NoActiveTarget,

    #[error("select at least two armatures")]
    NotEnoughArmatures,

    #[error("source and target are the same object")]
    SameObject,

    #[error("ambiguous source selection: {candidates} other armatures are selected")]
    AmbiguousSource { candidates: usize },

    #[error("{name:?} is not an armature")]
    NotAnArmature { name: String },

    #[error("clip {name:?} disappeared from the store during rebake")]
    ClipVanished { name: String },
}

/// Resolve source and target from the scene selection: the active object is
/// the target, the one other selected armature is the source. More than one
/// candidate is refused rather than picked by iteration order.
pub fn resolve_selection(
    scene: &Scene,
) -> Result<(Handle<SceneObject>, Handle<SceneObject>), TransferError> {
    let target = scene.active.ok_or(TransferError::NoActiveTarget)?;
    let active = scene
        .objects
        .get(target)
        .ok_or(TransferError::NoActiveTarget)?;
    if !active.is_armature() {
        return Err(TransferError::NotAnArmature {
            name: active.name.clone(),
        });
    }

    let candidates: Vec<_> = scene
        .selected_armatures()
        .into_iter()
        .filter(|handle| *handle != target)
        .collect();

    match candidates.as_slice() {
        [] => Err(TransferError::NotEnoughArmatures),
        [source] => Ok((*source, target)),
        _ => Err(TransferError::AmbiguousSource {
            candidates: candidates.len(),
        }),
    }
}

fn require_armature(scene: &Scene, handle: Handle<SceneObject>) -> Result<(), TransferError> {
    let object = scene
        .objects
        .get(handle)
        .ok_or(TransferError::NotEnoughArmatures)?;
    if object.is_armature() {
        Ok(())
    } else {
        Err(TransferError::NotAnArmature {
            name: object.name.clone(),
        })
    }
}

/// Transfer every clip from the source skeleton onto the target's topology.
///
/// The two skeletons are merged, all clips are rebaked onto the merged
/// result, and the source is deleted. The returned handle is the final
/// skeleton; it is the same scene object as `target`. The sequence is
/// destructive and not transactional: on error, earlier phases stay applied.
pub fn transfer(
    scene: &mut Scene,
    source: Handle<SceneObject>,
    target: Handle<SceneObject>,
    options: &TransferOptions,
    progress: &mut dyn FnMut(u32),
) -> Result<Handle<SceneObject>, TransferError> {
    if source == target {
        return Err(TransferError::SameObject);
    }
    require_armature(scene, source)?;
    require_armature(scene, target)?;

    progress(0);

    // The source holds still while the correspondence is measured; the
    // target shows its animated pose, which becomes the new bind pose.
    scene.set_pose_position(source, PosePosition::Rest);
    scene.set_pose_position(target, PosePosition::Pose);
    scene.set_mode(target, Mode::Pose);

    let original_parents = merge::capture_original_parents(scene, target);
    let correspondence = correspondence::resolve(
        scene,
        source,
        target,
        options.search_radius,
        &options.search_blacklist,
    );
    tracing::info!(phase = "resolve", "Transfer checkpoint");

    merge::prepare(scene, source, target, &correspondence);
    merge::patch_clip_paths(scene, &correspondence.renames);

    // The merged source drives the bake through its animated pose.
    scene.set_pose_position(source, PosePosition::Pose);

    merge::finalize(
        scene,
        source,
        target,
        &correspondence,
        &original_parents,
        options.clean_transfer,
    );
    tracing::info!(phase = "merge", "Transfer checkpoint");

    // Strip any constraints the merge carried over before driving the bake.
    scene.set_mode(target, Mode::Pose);
    if let Some(armature) = scene.armature_mut(target) {
        armature.clear_constraints();
    }

    progress(10);
    let rebaked = rebake::rebake_all(scene, source, target, progress)?;
    tracing::info!(phase = "rebake", clips = rebaked, "Transfer checkpoint");

    // Defense in depth: the final skeleton ends with zero constraints.
    if let Some(armature) = scene.armature_mut(target) {
        armature.clear_constraints();
    }

    // Every mesh riding either skeleton now deforms with (and sits under)
    // the final one.
    let mut meshes = scene.meshes_bound_to(source);
    meshes.extend(scene.meshes_bound_to(target));
    for mesh in meshes {
        scene.rebind_mesh(mesh, target);
        if let Some(object) = scene.objects.get_mut(mesh) {
            object.parent = Some(target);
        }
    }

    scene.remove_object(source);
    scene.set_mode(target, Mode::Pose);
    scene.set_pose_position(target, PosePosition::Pose);
    tracing::info!(phase = "cleanup", "Transfer checkpoint");

    progress(100);
    Ok(target)
}
