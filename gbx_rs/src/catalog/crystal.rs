use crate::{rw::ReaderWriter, Context, GbxError, GbxErrorInner, Id, Int2, ReadWrite, Vec2, Vec3};

const MIN_VERSION: u32 = 32;
const MAX_VERSION: u32 = 37;

/// Editable mesh shared by the crystal classes.
///
/// Carries its own version, independent of the chunk that contains it.
#[derive(Debug, Clone, PartialEq)]
pub struct Crystal {
    pub version: u32,
    pub materials: Vec<Id>,
    pub groups: Vec<CrystalGroup>,
    pub is_embedded: bool,
    pub positions: Vec<Vec3>,
    pub edges: Vec<Int2>,
    pub faces: Vec<CrystalFace>,
}

impl Default for Crystal {
    fn default() -> Self {
        Crystal {
            version: MAX_VERSION,
            materials: Vec::new(),
            groups: Vec::new(),
            is_embedded: false,
            positions: Vec::new(),
            edges: Vec::new(),
            faces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrystalGroup {
    pub name: String,
    pub unknown: u32,
    /// Index of the parent group, `-1` at the top.
    pub parent: i32,
}

impl ReadWrite for CrystalGroup {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.string(&mut self.name).context("Reading group name")?;
        rw.u32(&mut self.unknown).context("Reading group unknown")?;
        rw.i32(&mut self.parent).context("Reading group parent")
    }
}

/// A polygon. `vertices` and `uvs` always have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrystalFace {
    /// Indices into [`Crystal::positions`].
    pub vertices: Vec<u32>,
    pub uvs: Vec<Vec2>,
    /// Index into [`Crystal::materials`].
    pub material: u32,
    /// Index into [`Crystal::groups`].
    pub group: u32,
}

impl Crystal {
    fn read_write_face(
        &self,
        rw: &mut ReaderWriter<'_, '_>,
        face: &mut CrystalFace,
    ) -> Result<(), GbxError> {
        let num_positions = self.positions.len() as u32;
        let num_materials = self.materials.len() as u32;
        let num_groups = self.groups.len() as u32;

        let mut num_vertices = face.vertices.len();
        rw.count(&mut num_vertices)
            .context("Reading face vertex count")?;
        rw.array_fixed_with(&mut face.vertices, num_vertices, |rw, index| {
            rw.optimized_int(index, num_positions)
        })
        .context("Reading face vertices")?;
        rw.array_fixed(&mut face.uvs, num_vertices)
            .context("Reading face UVs")?;

        rw.optimized_int(&mut face.material, num_materials)
            .context("Reading face material")?;
        rw.optimized_int(&mut face.group, num_groups)
            .context("Reading face group")?;

        if face.group >= num_groups {
            return Err(GbxErrorInner::SizeValidation {
                length: face.group as i64,
                position: rw.position(),
                limit: self.groups.len(),
            }
            .into());
        }

        Ok(())
    }
}

impl ReadWrite for Crystal {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.version).context("Reading crystal version")?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.version) {
            return Err(rw.unsupported_version(self.version as i32));
        }
        tracing::trace!("crystal version {}", self.version);

        rw.array(&mut self.materials)
            .context("Reading crystal materials")?;
        rw.array(&mut self.groups).context("Reading crystal groups")?;
        if self.version >= 34 {
            rw.bool(&mut self.is_embedded)
                .context("Reading is embedded crystal")?;
        }
        rw.array(&mut self.positions)
            .context("Reading crystal positions")?;
        rw.array(&mut self.edges).context("Reading crystal edges")?;

        let mut faces = std::mem::take(&mut self.faces);
        let result = rw.array_with(&mut faces, |rw, face| self.read_write_face(rw, face));
        self.faces = faces;
        result.context("Reading crystal faces")?;

        tracing::trace!(
            "crystal: {} positions, {} faces in {} groups",
            self.positions.len(),
            self.faces.len(),
            self.groups.len()
        );
        Ok(())
    }
}
