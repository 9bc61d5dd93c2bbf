//! Instance registry: per-collection instance records and their GPU buffers.

mod constants;
mod id;
mod state;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{GpuError, InstanceError};
use crate::gpu::RenderDevice;
use crate::math::{self, Mat4};

pub use constants::{InstanceConstants, ParentConstants};
pub use id::{InstanceIdAllocator, InstanceKind, STARTING_GENERATED_ID};
pub use state::{InstanceHandle, InstanceState, ROOT_PARENT};

/// A scene node that owns one instance.
pub trait InstanceNode {
    /// Transform relative to the collection's parent.
    fn local_transform(&self) -> Mat4;
}

/// Node that is just a transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedNode {
    pub transform: Mat4,
}

impl PlacedNode {
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            transform: math::translation(x, y, z),
        }
    }
}

impl Default for PlacedNode {
    fn default() -> Self {
        Self {
            transform: math::IDENTITY,
        }
    }
}

impl InstanceNode for PlacedNode {
    fn local_transform(&self) -> Mat4 {
        self.transform
    }
}

/// [`InstanceState`] behind a mutex, so builders on worker threads can
/// register while the render thread reads buffers.
pub struct InstanceRegistry<N, D: RenderDevice> {
    state: Mutex<InstanceState<N, D>>,
}

impl<N: InstanceNode, D: RenderDevice> InstanceRegistry<N, D> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(InstanceState::new(label)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState<N, D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, node: N, constants: InstanceConstants) -> InstanceHandle {
        self.lock().append(node, constants)
    }

    pub fn retire(&self, handle: InstanceHandle) -> Result<N, InstanceError> {
        self.lock().retire(handle)
    }

    pub fn add_parent(&self, model_matrix: Mat4) -> u32 {
        self.lock().add_parent(model_matrix)
    }

    pub fn set_parent(&self, index: u32, model_matrix: Mat4) -> bool {
        self.lock().set_parent(index, model_matrix)
    }

    /// Copy of the constants for `handle`, if it is live.
    pub fn constants(&self, handle: InstanceHandle) -> Option<InstanceConstants> {
        self.lock().get(handle).map(|(_, constants)| *constants)
    }

    /// Edit one instance in place.
    pub fn update(
        &self,
        handle: InstanceHandle,
        edit: impl FnOnce(&mut N, &mut InstanceConstants),
    ) -> Result<(), InstanceError> {
        let mut state = self.lock();
        let (node, constants) = state.get_mut(handle).ok_or(InstanceError::StaleHandle {
            index: handle.index(),
            generation: handle.generation(),
        })?;
        edit(node, constants);
        Ok(())
    }

    pub fn update_frame(&self, device: &D, parent_transform: &Mat4) -> Result<(), GpuError> {
        self.lock().update_frame(device, parent_transform)
    }

    pub fn update_frame_with(
        &self,
        device: &D,
        parent_transform: &Mat4,
        hook: impl FnMut(&mut N, &mut InstanceConstants),
    ) -> Result<(), GpuError> {
        self.lock().update_frame_with(device, parent_transform, hook)
    }

    /// Run `f` with the current instance and parent buffers and the slot count.
    ///
    /// Rebuilds whichever buffer is dirty first. The lock is held for the
    /// duration of `f`.
    pub fn with_buffers<R>(
        &self,
        device: &D,
        f: impl FnOnce(&D::Buffer, &D::Buffer, u32) -> R,
    ) -> Result<R, GpuError> {
        let mut state = self.lock();
        let count = state.slot_count();
        let (instances, parents) = state.buffers(device)?;
        Ok(f(instances, parents, count))
    }

    /// Run `f` with exclusive access to the underlying state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut InstanceState<N, D>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn instance_rebuild_count(&self) -> u64 {
        self.lock().instance_rebuild_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(InstanceRegistry::<PlacedNode, HeadlessDevice>::new("shared"));
        let ids = Arc::new(InstanceIdAllocator::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let ids = ids.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        let constants = InstanceConstants::new().with_instance_id(ids.next_glyph_id());
                        registry.register(PlacedNode::default(), constants);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 1000);
        let device = HeadlessDevice::new();
        let count = registry.with_buffers(&device, |_, _, count| count).unwrap();
        assert_eq!(count, 1000);
        assert_eq!(registry.instance_rebuild_count(), 1);

        let mut seen = std::collections::HashSet::new();
        registry.with_state(|state| {
            state.for_each(|_, _, constants| {
                assert!(seen.insert(constants.instance_id));
            })
        });
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_update_rejects_stale_handle() {
        let registry = InstanceRegistry::<PlacedNode, HeadlessDevice>::new("r");
        let h = registry.register(PlacedNode::default(), InstanceConstants::new());
        registry
            .update(h, |_, constants| constants.instance_id = 77)
            .unwrap();
        assert_eq!(registry.constants(h).unwrap().instance_id, 77);

        registry.retire(h).unwrap();
        assert!(registry.update(h, |_, _| {}).is_err());
        assert!(registry.constants(h).is_none());
    }
}
