use crate::{
    codec::CompressedSection, node::NodeRef, rw::ReaderWriter, Byte3, Context, FileRef, GbxError,
    GbxErrorInner, Id, Int3, Meta, ReadWrite, Vec2, FACADE,
};

const THUMBNAIL_START: &str = "<Thumbnail.jpg>";
const THUMBNAIL_END: &str = "</Thumbnail.jpg>";
const COMMENTS_START: &str = "<Comments>";
const COMMENTS_END: &str = "</Comments>";

/// Block flags marking a free block with nothing after its position.
const FREE_BLOCK: u32 = 0xffff_ffff;
const BLOCK_SKIN: u32 = 0x8000;
const BLOCK_WAYPOINT: u32 = 0x0010_0000;

fn tag(rw: &mut ReaderWriter<'_, '_>, tag: &'static str) -> Result<(), GbxError> {
    let mut value = String::from(tag);
    rw.string_exact(&mut value, tag.len())
        .with_context(|| format!("Reading {tag} tag"))?;
    if value != tag {
        tracing::warn!("Expected {:?}, found {:?}", tag, value);
    }
    Ok(())
}

/// A map.
#[derive(Default, Clone, PartialEq, derivative::Derivative)]
#[derivative(Debug)]
pub struct CGameCtnChallenge {
    pub map_info: Meta,
    pub map_name: String,
    pub bronze_time: u32,
    pub silver_time: u32,
    pub gold_time: u32,
    pub author_time: u32,
    pub cost: u32,
    pub is_lap_race: bool,
    pub is_multilap: bool,
    pub play_mode: u32,
    pub author_score: u32,
    pub editor_mode: u32,
    pub num_checkpoints: u32,
    pub num_laps: u32,
    pub unknown_1: u32,
    pub unknown_2: u8,
    pub unknown_3: u32,
    pub unknown_4: u32,

    pub kind: u8,
    pub locked: bool,
    pub password: String,
    pub decoration: Meta,
    pub map_coord_origin: Vec2,
    pub map_coord_target: Vec2,
    pub pack_mask: u128,
    pub map_type: String,
    pub map_style: String,
    pub lightmap_cache_uid: u64,
    pub lightmap_version: u8,
    pub title_id: Id,

    pub header_version: u32,
    pub xml_data: String,
    #[derivative(Debug = "ignore")]
    pub thumbnail: Vec<u8>,
    pub comments: String,

    pub author_version: u32,
    pub author_login: String,
    pub author_nickname: String,
    pub author_zone: String,
    pub author_extra_info: String,

    pub vehicle_model: Meta,
    /// [`CGameCtnCollectorList`]
    pub block_stock: Option<NodeRef>,
    /// [`CGameCtnChallengeParameters`]
    pub challenge_parameters: Option<NodeRef>,
    pub map_kind: u32,
    pub size: Int3,
    pub need_unlock: bool,
    pub blocks: Vec<Block>,
    pub unknown_22: u32,
    pub music: FileRef,
    pub simple_editor: bool,
}

impl CGameCtnChallenge {
    pub(super) fn map_info(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw.version_u8().context("Reading map info 1 version")?;

        if version <= 2 {
            rw.meta(&mut self.map_info)
                .context("Reading map info 1 map info")?;
            rw.string(&mut self.map_name)
                .context("Reading map info 1 map name")?;
        }

        rw.u32(&mut self.unknown_1)
            .context("Reading map info 1 unknown 1")?;

        if version >= 1 {
            rw.u32(&mut self.bronze_time)
                .context("Reading map info 1 bronze time")?;
            rw.u32(&mut self.silver_time)
                .context("Reading map info 1 silver time")?;
            rw.u32(&mut self.gold_time)
                .context("Reading map info 1 gold time")?;
            rw.u32(&mut self.author_time)
                .context("Reading map info 1 author time")?;
        }

        if version == 2 {
            rw.u8(&mut self.unknown_2)
                .context("Reading map info 1 unknown 2")?;
        }

        if version >= 4 {
            rw.u32(&mut self.cost).context("Reading map info 1 cost")?;
        }

        if version >= 5 {
            rw.bool(&mut self.is_lap_race).context("Reading lap race")?;
        }

        if version == 6 {
            rw.bool(&mut self.is_multilap)
                .context("Reading is multilap")?;
        }

        if version >= 7 {
            rw.u32(&mut self.play_mode).context("Reading play mode")?;
        }

        if version >= 9 {
            rw.u32(&mut self.unknown_3)
                .context("Reading map info 1 unknown 3")?;
        }

        if version >= 10 {
            rw.u32(&mut self.author_score)
                .context("Reading map info 1 author score")?;
        }

        if version >= 11 {
            rw.u32(&mut self.editor_mode)
                .context("Reading editor mode")?;
        }

        if version >= 12 {
            rw.u32(&mut self.unknown_4)
                .context("Reading map info 1 unknown 4")?;
        }

        if version >= 13 {
            rw.u32(&mut self.num_checkpoints)
                .context("Reading num checkpoints")?;
            rw.u32(&mut self.num_laps).context("Reading num laps")?;
        }

        Ok(())
    }

    pub(super) fn common(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw.version_u8().context("Reading map info 2 version")?;

        rw.meta(&mut self.map_info)
            .context("Reading map info 2 map info")?;
        rw.string(&mut self.map_name)
            .context("Reading map info 2 map name")?;
        rw.u8(&mut self.kind).context("Reading map info 2 map kind")?;

        if version >= 1 {
            rw.bool(&mut self.locked)
                .context("Reading map info 2 locked")?;
            rw.string(&mut self.password)
                .context("Reading map info 2 password")?;
        }

        if version >= 2 {
            rw.meta(&mut self.decoration)
                .context("Reading map info 2 decoration")?;
        }

        if version >= 3 {
            rw.vec2(&mut self.map_coord_origin)
                .context("Reading map info 2 map coord origin")?;
        }

        if version >= 4 {
            rw.vec2(&mut self.map_coord_target)
                .context("Reading map info 2 map coord target")?;
        }

        if version >= 5 {
            rw.u128(&mut self.pack_mask)
                .context("Reading map info 2 pack mask")?;
        }

        if version >= 6 {
            rw.string(&mut self.map_type)
                .context("Reading map info 2 map type")?;
            rw.string(&mut self.map_style)
                .context("Reading map info 2 map style")?;
        }

        if version >= 8 {
            rw.u64(&mut self.lightmap_cache_uid)
                .context("Reading map info 2 lightmap cache uid")?;
        }

        if version >= 9 {
            rw.u8(&mut self.lightmap_version)
                .context("Reading map info 2 lightmap version")?;
        }

        if version >= 11 {
            rw.id(&mut self.title_id)
                .context("Reading map info 2 title ID")?;
        }

        Ok(())
    }

    pub(super) fn header_version(
        &mut self,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError> {
        rw.u32(&mut self.header_version)
            .context("Reading header version")
    }

    pub(super) fn xml(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.string(&mut self.xml_data).context("Reading XML data")
    }

    pub(super) fn thumbnail(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw.version_i32().context("Reading thumbnail version")?;
        if version == 0 {
            return Ok(());
        }

        let mut size = self.thumbnail.len() as u32;
        rw.u32(&mut size).context("Reading thumbnail size")?;
        tag(rw, THUMBNAIL_START)?;
        rw.raw(&mut self.thumbnail, size as usize)
            .context("Reading thumbnail data")?;
        tag(rw, THUMBNAIL_END)?;
        tag(rw, COMMENTS_START)?;
        rw.string(&mut self.comments).context("Reading comments")?;
        tag(rw, COMMENTS_END)
    }

    pub(super) fn author(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.version_i32()
            .context("Reading author information version")?;
        rw.u32(&mut self.author_version)
            .context("Reading author version")?;
        rw.string(&mut self.author_login)
            .context("Reading author login")?;
        rw.string(&mut self.author_nickname)
            .context("Reading author nickname")?;
        rw.string(&mut self.author_zone)
            .context("Reading author zone")?;
        rw.string(&mut self.author_extra_info)
            .context("Reading author extra info")
    }

    pub(super) fn vehicle(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.meta(&mut self.vehicle_model)
            .context("Reading vehicle model")
    }

    pub(super) fn parameters(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.node_ref_of::<CGameCtnCollectorList>(&mut self.block_stock)
            .context("Reading block stock")?;
        rw.node_ref_of::<CGameCtnChallengeParameters>(&mut self.challenge_parameters)
            .context("Reading challenge parameters")?;
        rw.u32(&mut self.map_kind).context("Reading map kind")
    }

    pub(super) fn blocks(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        tracing::trace!("block data");
        rw.meta(&mut self.map_info).context("Reading map info")?;
        rw.string(&mut self.map_name).context("Reading map name")?;
        rw.meta(&mut self.decoration).context("Reading decoration")?;
        rw.value(&mut self.size).context("Reading map size")?;
        rw.bool(&mut self.need_unlock)
            .context("Reading needs unlock")?;
        rw.version_i32().context("Reading block data version")?;

        let mut num_blocks = self.blocks.iter().filter(|block| !block.is_free()).count() as u32;
        rw.u32(&mut num_blocks)
            .context("Reading number of blocks")?;

        if rw.is_writer() {
            for (i, block) in self.blocks.iter_mut().enumerate() {
                rw.value(block)
                    .with_context(|| format!("Writing block {i}"))?;
            }
            return Ok(());
        }

        self.blocks.clear();
        let mut counted = 0;
        while counted < num_blocks {
            let mut block = Block::default();
            rw.value(&mut block)
                .with_context(|| format!("Reading block {counted}"))?;
            if !block.is_free() {
                counted += 1;
            }
            self.blocks.push(block);
        }

        // Free blocks may follow the counted ones. Their names are lookback
        // strings, so the top bits of the next word tell them apart from the
        // next chunk ID or the node terminator.
        while let Some(r) = rw.as_reader() {
            if r.remaining() < 4 {
                break;
            }
            let next = r.peek_u32().context("Peeking for more blocks")?;
            if next == FACADE || next & 0xc000_0000 == 0 {
                break;
            }
            let mut block = Block::default();
            rw.value(&mut block)
                .with_context(|| format!("Reading trailing block {}", self.blocks.len()))?;
            self.blocks.push(block);
        }

        Ok(())
    }

    pub(super) fn unknown_22(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.unknown_22).context("Reading unknown")
    }

    pub(super) fn music(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.value(&mut self.music)
            .context("Reading music file reference")
    }

    pub(super) fn coords(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.vec2(&mut self.map_coord_origin)
            .context("Reading origin")?;
        rw.vec2(&mut self.map_coord_target)
            .context("Reading target")
    }

    pub(super) fn simple_editor(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.bool(&mut self.simple_editor)
            .context("Reading simple editor")
    }
}

/// One block of a map. Layout depends on the block data version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub name: Id,
    pub direction: u8,
    pub position: Byte3,
    pub flags: u32,
    pub author: Id,
    /// [`CGameCtnBlockSkin`]
    pub skin: Option<NodeRef>,
    /// [`CGameWaypointSpecialProperty`]
    pub waypoint: Option<NodeRef>,
}

impl Block {
    pub fn is_free(&self) -> bool {
        self.flags == FREE_BLOCK
    }
}

impl ReadWrite for Block {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.id(&mut self.name).context("Reading block name")?;
        rw.u8(&mut self.direction)
            .context("Reading block direction")?;
        rw.value(&mut self.position)
            .context("Reading block position")?;

        if rw.version() == 0 {
            let mut flags = self.flags as u16;
            rw.u16(&mut flags).context("Reading block flags (u16)")?;
            self.flags = flags as u32;
        } else {
            rw.u32(&mut self.flags).context("Reading block flags")?;
        }

        if self.is_free() {
            return Ok(());
        }

        if self.flags & BLOCK_SKIN != 0 {
            rw.id(&mut self.author).context("Reading block author")?;
            rw.node_ref_of::<CGameCtnBlockSkin>(&mut self.skin)
                .context("Reading block skin")?;
        }

        if self.flags & BLOCK_WAYPOINT != 0 {
            rw.node_ref_of::<CGameWaypointSpecialProperty>(&mut self.waypoint)
                .context("Reading block waypoint property")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGameCtnChallengeParameters {
    pub tip1: String,
    pub tip2: String,
    pub tip3: String,
    pub tip4: String,
    pub bronze_time: u32,
    pub silver_time: u32,
    pub gold_time: u32,
    pub author_time: u32,
    pub medal_unknown: u32,
    pub time_limit: u32,
    pub author_score: u32,
    pub tip: String,
    /// [`CGameCtnGhost`]
    pub validation_ghost: Option<NodeRef>,
    pub map_type: String,
    pub map_style: String,
    pub is_validated: bool,
}

impl CGameCtnChallengeParameters {
    pub(super) fn tips(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        tracing::trace!("tips");
        rw.string(&mut self.tip1).context("Reading tip 1")?;
        rw.string(&mut self.tip2).context("Reading tip 2")?;
        rw.string(&mut self.tip3).context("Reading tip 3")?;
        rw.string(&mut self.tip4).context("Reading tip 4")
    }

    pub(super) fn medal_times(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        tracing::trace!("medal times");
        rw.u32(&mut self.bronze_time)
            .context("Reading bronze time")?;
        rw.u32(&mut self.silver_time)
            .context("Reading silver time")?;
        rw.u32(&mut self.gold_time).context("Reading gold time")?;
        rw.u32(&mut self.author_time)
            .context("Reading author time")?;
        rw.u32(&mut self.medal_unknown)
            .context("Reading unknown medal time parameter")
    }

    pub(super) fn stunt_info(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        tracing::trace!("stunt info");
        rw.u32(&mut self.time_limit).context("Reading time limit")?;
        rw.u32(&mut self.author_score)
            .context("Reading author score")
    }

    pub(super) fn skippable_times(
        &mut self,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError> {
        tracing::trace!("skippable medal times");
        rw.string(&mut self.tip)
            .context("Reading skippable medal times tip")?;
        rw.u32(&mut self.bronze_time)
            .context("Reading skippable bronze time")?;
        rw.u32(&mut self.silver_time)
            .context("Reading skippable silver time")?;
        rw.u32(&mut self.gold_time)
            .context("Reading skippable gold time")?;
        rw.u32(&mut self.author_time)
            .context("Reading skippable author time")?;
        rw.u32(&mut self.time_limit)
            .context("Reading skippable time limit")?;
        rw.u32(&mut self.author_score)
            .context("Reading skippable author score")
    }

    pub(super) fn validation_ghost(
        &mut self,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError> {
        rw.node_ref_of::<CGameCtnGhost>(&mut self.validation_ghost)
            .context("Reading validation ghost")
    }

    pub(super) fn map_type(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.string(&mut self.map_type).context("Reading map type")?;
        rw.string(&mut self.map_style).context("Reading map style")?;
        rw.bool(&mut self.is_validated)
            .context("Reading is validated")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGameCtnCollectorList {
    pub block_set: Vec<Meta>,
}

impl CGameCtnCollectorList {
    pub(super) fn block_set(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.array(&mut self.block_set).context("Reading block set")?;
        tracing::trace!("block set: {} blocks", self.block_set.len());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGameCtnBlockSkin {
    pub text: String,
    pub unknown: String,
    pub pack_desc: FileRef,
    pub parent_pack_desc: FileRef,
    pub foreground_pack_desc: FileRef,
}

impl CGameCtnBlockSkin {
    pub(super) fn text(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.string(&mut self.text).context("Reading block text")?;
        rw.string(&mut self.unknown)
            .context("Reading block text unknown")
    }

    pub(super) fn skin(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.string(&mut self.text)
            .context("Reading block skin text")?;
        rw.value(&mut self.pack_desc)
            .context("Reading block skin pack desc")
    }

    pub(super) fn skin_and_parent(
        &mut self,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError> {
        rw.string(&mut self.text)
            .context("Reading block skin/parent text data")?;
        rw.value(&mut self.pack_desc)
            .context("Reading block skin/parent pack desc")?;
        rw.value(&mut self.parent_pack_desc)
            .context("Reading block skin/parent parent pack desc")
    }

    pub(super) fn secondary_skin(
        &mut self,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError> {
        rw.version_i32()
            .context("Reading secondary skin version")?;
        rw.value(&mut self.foreground_pack_desc)
            .context("Reading secondary skin foreground pack desc")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGameWaypointSpecialProperty {
    pub order: u32,
    pub spawn: u32,
    pub tag: String,
}

impl CGameWaypointSpecialProperty {
    pub(super) fn waypoint(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        let version = rw
            .version_i32()
            .context("Reading waypoint data version")?;

        if version == 1 {
            rw.u32(&mut self.spawn).context("Reading waypoint spawn")?;
        } else {
            rw.string(&mut self.tag).context("Reading waypoint tag")?;
        }
        rw.u32(&mut self.order).context("Reading waypoint order")
    }
}

/// Recorded vehicle states of a ghost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GhostSamples {
    pub saved_mobil_class_id: u32,
    pub is_fixed_time_step: bool,
    pub unknown: i32,
    pub sample_period: i32,
    pub version: i32,
    pub state_buffer: Vec<u8>,
    pub num_samples: i32,
    pub first_sample_offset: i32,
    /// `-1` when samples have different sizes, listed in `sample_sizes`.
    pub size_per_sample: i32,
    pub sample_sizes: Vec<i32>,
    pub sample_times: Vec<i32>,
}

fn sample_count(count: i32) -> Result<usize, GbxError> {
    usize::try_from(count).map_err(|_| {
        GbxErrorInner::SizeValidation {
            length: count as i64,
            position: 0,
            limit: i32::MAX as usize,
        }
        .into()
    })
}

impl ReadWrite for GhostSamples {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.saved_mobil_class_id)
            .context("Reading saved mobil class ID")?;
        rw.bool(&mut self.is_fixed_time_step)
            .context("Reading is fixed time step")?;
        rw.i32(&mut self.unknown).context("Reading unknown")?;
        rw.i32(&mut self.sample_period)
            .context("Reading sample period")?;
        rw.i32(&mut self.version)
            .context("Reading sample version")?;
        rw.bytes(&mut self.state_buffer)
            .context("Reading state buffer")?;

        if self.state_buffer.is_empty() {
            return Ok(());
        }

        rw.i32(&mut self.num_samples)
            .context("Reading number of samples")?;
        let num_samples = sample_count(self.num_samples)?;

        if num_samples > 0 {
            rw.i32(&mut self.first_sample_offset)
                .context("Reading first sample offset")?;
            if num_samples > 1 {
                rw.i32(&mut self.size_per_sample)
                    .context("Reading size per sample")?;
                if self.size_per_sample == -1 {
                    rw.array_fixed(&mut self.sample_sizes, num_samples - 1)
                        .context("Reading sample sizes")?;
                }
            }
        }

        if !self.is_fixed_time_step {
            rw.array_fixed(&mut self.sample_times, num_samples)
                .context("Reading sample times")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGameGhost {
    pub samples: CompressedSection<GhostSamples>,
}

impl CGameGhost {
    pub(super) fn samples(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.compressed(&mut self.samples)
            .context("Reading ghost samples")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CGameCtnGhost {
    pub ghost: CGameGhost,
    pub race_time: u32,
    pub respawns: u32,
    pub stunt_score: u32,
}

impl CGameCtnGhost {
    pub(super) fn ghost_samples(
        &mut self,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError> {
        self.ghost.samples(rw)
    }

    pub(super) fn race_time(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.race_time).context("Reading race time")
    }

    pub(super) fn respawns(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.respawns).context("Reading respawns")
    }

    pub(super) fn stunt_score(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u32(&mut self.stunt_score)
            .context("Reading stunt score")
    }
}
