//! Merge two skeletal rigs and transfer every animation clip from the
//! source skeleton onto the target's bone topology.
//!
//! The target keeps its object identity and bone hierarchy; the source's
//! motion is rebaked into new clips on the merged result and the source is
//! deleted. See [transfer::transfer] for the one-shot entry point.

pub mod clip;
pub mod interpolate;
pub mod pose;
pub mod scene;
pub mod skeleton;
pub mod storage;
pub mod track;
pub mod transfer;
pub mod transform;

pub use scene::{MeshBinding, ObjectData, Scene, SceneObject};
pub use skeleton::{Armature, Bone, BoneId, Constraint, ConstraintKind, Mode, PosePosition};
pub use transfer::{TransferError, TransferOptions, resolve_selection, transfer};
pub use transform::Transform;
