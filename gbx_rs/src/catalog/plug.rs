use crate::{node::NodeRef, rw::ReaderWriter, Context, GbxError, Id, Vec2, Vec3};

use super::Crystal;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPlugMaterialUserInst {
    pub material_name: Id,
    pub model: Id,
    pub surface_physic_id: u8,
    pub surface_gameplay_id: u8,
    pub link: Id,
    pub hiding_group: Id,
    pub texture_count: i32,
}

impl CPlugMaterialUserInst {
    pub(super) fn material(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw.version_i32().context("Reading material version")?;

        rw.id(&mut self.material_name)
            .context("Reading material name")?;
        rw.id(&mut self.model).context("Reading material model")?;

        if version >= 2 {
            rw.u8(&mut self.surface_physic_id)
                .context("Reading surface physic ID")?;
            rw.u8(&mut self.surface_gameplay_id)
                .context("Reading surface gameplay ID")?;
        }

        if version >= 3 {
            rw.id(&mut self.link).context("Reading material link")?;
        }

        Ok(())
    }

    pub(super) fn hiding_group(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.version_i32()
            .context("Reading hiding group version")?;
        rw.id(&mut self.hiding_group)
            .context("Reading hiding group")?;
        rw.i32(&mut self.texture_count)
            .context("Reading texture count")
    }
}

/// What a vertex stream is used for, bits 4 to 7 of its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexUsage {
    Static,
    Dynamic,
    Skinned,
    Other(u8),
}

impl From<u8> for VertexUsage {
    fn from(value: u8) -> Self {
        match value {
            0 => VertexUsage::Static,
            1 => VertexUsage::Dynamic,
            2 => VertexUsage::Skinned,
            other => VertexUsage::Other(other),
        }
    }
}

impl From<VertexUsage> for u8 {
    fn from(value: VertexUsage) -> Self {
        match value {
            VertexUsage::Static => 0,
            VertexUsage::Dynamic => 1,
            VertexUsage::Skinned => 2,
            VertexUsage::Other(other) => other,
        }
    }
}

const SKIP_VISION: u32 = 1 << 0;
const USAGE_SHIFT: u32 = 4;
const USAGE_MASK: u32 = 0xf << USAGE_SHIFT;
const HAS_NORMALS: u32 = 1 << 9;
const HAS_UVS: u32 = 1 << 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPlugVertexStream {
    pub count: u32,
    pub flags: u32,
    /// [`CPlugVertexStream`] sharing its layout with this one.
    pub stream_model: Option<NodeRef>,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
}

impl CPlugVertexStream {
    pub fn skip_vision(&self) -> bool {
        self.flags & SKIP_VISION != 0
    }

    pub fn usage(&self) -> VertexUsage {
        VertexUsage::from(((self.flags & USAGE_MASK) >> USAGE_SHIFT) as u8)
    }

    pub fn set_usage(&mut self, usage: VertexUsage) {
        let bits = (u8::from(usage) as u32) << USAGE_SHIFT;
        self.flags = (self.flags & !USAGE_MASK) | (bits & USAGE_MASK);
    }

    pub fn has_normals(&self) -> bool {
        self.flags & HAS_NORMALS != 0
    }

    pub fn has_uvs(&self) -> bool {
        self.flags & HAS_UVS != 0
    }

    pub(super) fn stream(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw
            .version_i32()
            .context("Reading vertex stream version")?;
        if version > 1 {
            return Err(rw.unsupported_version(version));
        }

        rw.u32(&mut self.count).context("Reading vertex count")?;
        rw.u32(&mut self.flags)
            .context("Reading vertex stream flags")?;
        tracing::trace!(
            "{} vertices, usage {:?}, flags {:08x}",
            self.count,
            self.usage(),
            self.flags
        );

        if version >= 1 {
            rw.node_ref_of::<CPlugVertexStream>(&mut self.stream_model)
                .context("Reading stream model")?;
        }

        if self.count == 0 {
            return Ok(());
        }

        let count = self.count as usize;
        rw.array_fixed(&mut self.positions, count)
            .context("Reading vertex positions")?;
        if self.has_normals() {
            rw.array_fixed(&mut self.normals, count)
                .context("Reading vertex normals")?;
        }
        if self.has_uvs() {
            rw.array_fixed(&mut self.uvs, count)
                .context("Reading vertex UVs")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPlugIndexBuffer {
    pub flags: u32,
    pub indices: Vec<u16>,
}

impl CPlugIndexBuffer {
    pub(super) fn indices(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.flags)
            .context("Reading index buffer flags")?;
        rw.delta_u16_array(&mut self.indices)
            .context("Reading indices")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPlugCrystal {
    pub crystal: Crystal,
}

impl CPlugCrystal {
    pub(super) fn crystal(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.version_i32().context("Reading crystal chunk version")?;
        rw.value(&mut self.crystal).context("Reading crystal")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CPlugSolid2Model {
    pub visuals: Vec<Option<NodeRef>>,
    pub material_ids: Vec<Id>,
    /// [`CPlugMaterialUserInst`]s, only stored when `material_ids` is empty.
    pub material_insts: Vec<Option<NodeRef>>,
    pub lod_distances: Vec<f32>,
}

impl CPlugSolid2Model {
    pub(super) fn model(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw.version_i32().context("Reading model version")?;

        rw.node_ref_array(&mut self.visuals)
            .context("Reading visuals")?;
        rw.array(&mut self.material_ids)
            .context("Reading material IDs")?;

        if self.material_ids.is_empty() {
            rw.array_with(&mut self.material_insts, |rw, inst| {
                rw.node_ref_of::<CPlugMaterialUserInst>(inst)
            })
            .context("Reading material instances")?;
        }

        if version >= 1 {
            rw.array(&mut self.lod_distances)
                .context("Reading LOD distances")?;
        }

        Ok(())
    }
}
