//! Instance lists and their lazily rebuilt GPU buffers.
//!
//! Nodes and their [`InstanceConstants`] live in parallel arrays. The instance
//! buffer is rebuilt only on the first read after a structural change (append
//! or retire); plain per-frame updates write into the existing buffer.

use crate::error::{GpuError, InstanceError};
use crate::gpu::{BufferKind, RenderDevice};
use crate::instance::{InstanceConstants, InstanceNode, ParentConstants};
use crate::math::{self, Mat4};

/// Stable reference to an instance slot.
///
/// Retiring an instance bumps its slot's generation, so old handles stop
/// resolving even after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    index: u32,
    generation: u32,
}

impl InstanceHandle {
    /// Slot in the instance buffer.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A GPU buffer plus the bookkeeping that decides when to rebuild it.
struct LazyBuffer<B> {
    buffer: Option<B>,
    /// Element count changed since the buffer was built.
    dirty: bool,
    /// Contents changed but the size did not.
    stale: bool,
    rebuilds: u64,
}

impl<B> LazyBuffer<B> {
    fn new() -> Self {
        Self {
            buffer: None,
            dirty: true,
            stale: false,
            rebuilds: 0,
        }
    }

    fn get<D, T>(&mut self, device: &D, label: &str, records: &[T]) -> Result<&B, GpuError>
    where
        D: RenderDevice<Buffer = B>,
        T: bytemuck::Pod,
    {
        let buffer = match self.buffer.take() {
            Some(buffer) if !self.dirty => {
                if self.stale {
                    if let Err(e) = device.write_buffer(&buffer, 0, bytemuck::cast_slice(records)) {
                        self.buffer = Some(buffer);
                        return Err(e);
                    }
                    self.stale = false;
                }
                buffer
            }
            _ => {
                let size = (records.len().max(1) * std::mem::size_of::<T>()) as u64;
                let buffer = device.create_buffer(label, size, BufferKind::Storage).inspect_err(|e| {
                    tracing::warn!(label, count = records.len(), error = %e, "instance buffer rebuild failed");
                })?;
                if !records.is_empty() {
                    device.write_buffer(&buffer, 0, bytemuck::cast_slice(records))?;
                }
                self.rebuilds += 1;
                self.dirty = false;
                self.stale = false;
                tracing::debug!(label, count = records.len(), "rebuilt instance buffer");
                buffer
            }
        };
        Ok(self.buffer.insert(buffer))
    }
}

/// Parent every instance starts under: an identity transform that always exists.
pub const ROOT_PARENT: u32 = 0;

/// Instances of one render collection.
pub struct InstanceState<N, D: RenderDevice> {
    nodes: Vec<Option<N>>,
    constants: Vec<InstanceConstants>,
    generations: Vec<u32>,
    free: Vec<u32>,
    parents: Vec<ParentConstants>,
    instance_buffer: LazyBuffer<D::Buffer>,
    parent_buffer: LazyBuffer<D::Buffer>,
    label: String,
}

impl<N: InstanceNode, D: RenderDevice> InstanceState<N, D> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            nodes: Vec::new(),
            constants: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            parents: vec![ParentConstants::default()],
            instance_buffer: LazyBuffer::new(),
            parent_buffer: LazyBuffer::new(),
            label: label.into(),
        }
    }

    /// Add an instance. Reuses a retired slot when one is free.
    pub fn append(&mut self, node: N, mut constants: InstanceConstants) -> InstanceHandle {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = index as usize;
                constants.buffer_index = index;
                self.nodes[slot] = Some(node);
                self.constants[slot] = constants;
                index
            }
            None => {
                let index = self.constants.len() as u32;
                constants.buffer_index = index;
                self.nodes.push(Some(node));
                self.constants.push(constants);
                self.generations.push(0);
                index
            }
        };
        self.instance_buffer.dirty = true;
        InstanceHandle {
            index,
            generation: self.generations[index as usize],
        }
    }

    fn check(&self, handle: InstanceHandle) -> Result<usize, InstanceError> {
        let slot = handle.index as usize;
        match (self.generations.get(slot), self.nodes.get(slot)) {
            (Some(&generation), Some(Some(_))) if generation == handle.generation => Ok(slot),
            _ => Err(InstanceError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            }),
        }
    }

    /// Remove an instance and free its slot for reuse.
    ///
    /// The slot's constants are zeroed, so it draws nothing until reused.
    pub fn retire(&mut self, handle: InstanceHandle) -> Result<N, InstanceError> {
        let slot = self.check(handle)?;
        let node = self.nodes[slot].take().ok_or(InstanceError::StaleHandle {
            index: handle.index,
            generation: handle.generation,
        })?;
        self.constants[slot] = bytemuck::Zeroable::zeroed();
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(handle.index);
        self.instance_buffer.dirty = true;
        Ok(node)
    }

    pub fn get(&self, handle: InstanceHandle) -> Option<(&N, &InstanceConstants)> {
        let slot = self.check(handle).ok()?;
        Some((self.nodes[slot].as_ref()?, &self.constants[slot]))
    }

    /// Mutable access; the next buffer read re-uploads without reallocating.
    pub fn get_mut(&mut self, handle: InstanceHandle) -> Option<(&mut N, &mut InstanceConstants)> {
        let slot = self.check(handle).ok()?;
        self.instance_buffer.stale = true;
        Some((self.nodes[slot].as_mut()?, &mut self.constants[slot]))
    }

    /// Add a virtual parent and return its index.
    pub fn add_parent(&mut self, model_matrix: Mat4) -> u32 {
        self.parents.push(ParentConstants { model_matrix });
        self.parent_buffer.dirty = true;
        (self.parents.len() - 1) as u32
    }

    /// Move an existing parent. Returns `false` for an unknown index.
    pub fn set_parent(&mut self, index: u32, model_matrix: Mat4) -> bool {
        match self.parents.get_mut(index as usize) {
            Some(parent) => {
                parent.model_matrix = model_matrix;
                self.parent_buffer.stale = true;
                true
            }
            None => false,
        }
    }

    /// Instance buffer, rebuilt first if the instance list changed shape.
    ///
    /// Sized for `max(1, slots)` records so an empty collection still binds.
    pub fn instance_buffer(&mut self, device: &D) -> Result<&D::Buffer, GpuError> {
        let label = format!("{} Instances", self.label);
        self.instance_buffer.get(device, &label, &self.constants)
    }

    pub fn parent_buffer(&mut self, device: &D) -> Result<&D::Buffer, GpuError> {
        let label = format!("{} Parents", self.label);
        self.parent_buffer.get(device, &label, &self.parents)
    }

    /// Both buffers, for binding in one draw.
    pub fn buffers(&mut self, device: &D) -> Result<(&D::Buffer, &D::Buffer), GpuError> {
        let instance_label = format!("{} Instances", self.label);
        let parent_label = format!("{} Parents", self.label);
        let instances = self.instance_buffer.get(device, &instance_label, &self.constants)?;
        let parents = self.parent_buffer.get(device, &parent_label, &self.parents)?;
        Ok((instances, parents))
    }

    /// Recompute every live model matrix as `parent × node.local_transform()`.
    pub fn update_frame(&mut self, device: &D, parent_transform: &Mat4) -> Result<(), GpuError> {
        self.update_frame_with(device, parent_transform, |_, _| {})
    }

    /// Like [`InstanceState::update_frame`], calling `hook` on each live
    /// instance before its matrix is recomputed.
    ///
    /// Never allocates: if the buffer needs a rebuild the new matrices go up
    /// with it on the next read.
    pub fn update_frame_with(
        &mut self,
        device: &D,
        parent_transform: &Mat4,
        mut hook: impl FnMut(&mut N, &mut InstanceConstants),
    ) -> Result<(), GpuError> {
        for (node, constants) in self.nodes.iter_mut().zip(self.constants.iter_mut()) {
            let Some(node) = node else { continue };
            hook(node, constants);
            constants.model_matrix = math::multiply(parent_transform, &node.local_transform());
        }

        match &self.instance_buffer.buffer {
            Some(buffer) if !self.instance_buffer.dirty && !self.constants.is_empty() => {
                device.write_buffer(buffer, 0, bytemuck::cast_slice(&self.constants))?;
                self.instance_buffer.stale = false;
            }
            _ => self.instance_buffer.stale = true,
        }
        Ok(())
    }

    /// Live instances.
    pub fn len(&self) -> usize {
        self.constants.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in the instance buffer, retired slots included.
    pub fn slot_count(&self) -> u32 {
        self.constants.len() as u32
    }

    /// Parents including [`ROOT_PARENT`].
    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn instance_rebuild_count(&self) -> u64 {
        self.instance_buffer.rebuilds
    }

    pub fn parent_rebuild_count(&self) -> u64 {
        self.parent_buffer.rebuilds
    }

    /// CPU copy of the instance records, in buffer order.
    pub fn constants(&self) -> &[InstanceConstants] {
        &self.constants
    }

    /// Visit every live instance.
    pub fn for_each(&self, mut visit: impl FnMut(InstanceHandle, &N, &InstanceConstants)) {
        for (slot, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                let handle = InstanceHandle {
                    index: slot as u32,
                    generation: self.generations[slot],
                };
                visit(handle, node, &self.constants[slot]);
            }
        }
    }
}
