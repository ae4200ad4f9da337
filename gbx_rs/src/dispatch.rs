use crate::{
    catalog::Class,
    node::{ChunkSlot, Node},
    reader::GbxReader,
    registry::{canonical_chunk_id, canonical_class_id, ChunkInfo},
    rw::ReaderWriter,
    writer::GbxWriter,
    Context, GbxError, GbxErrorInner, FACADE, SKIP,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

/// Constructs a node of `wire_class_id` and reads its chunks.
pub(crate) fn read_node(r: &mut GbxReader<'_>, wire_class_id: u32) -> Result<Node, GbxError> {
    let class_id = canonical_class_id(wire_class_id);
    let class = Class::new(class_id).ok_or(GbxErrorInner::UnknownClass(wire_class_id))?;
    let mut node = Node::from_parts(class_id, wire_class_id, class);
    read_chunks(r, &mut node)?;
    Ok(node)
}

/// Reads chunks into `node` until the node terminator.
pub(crate) fn read_chunks(r: &mut GbxReader<'_>, node: &mut Node) -> Result<(), GbxError> {
    loop {
        r.check_cancelled()?;

        let wire_id = r.read_u32::<LE>().context("Reading chunk ID")?;
        if wire_id == FACADE {
            break;
        }

        let chunk_id = canonical_chunk_id(wire_id);
        let info = node.class.chunk(chunk_id);
        tracing::trace!(
            "chunk {:08x} (wire {:08x}) of {}",
            chunk_id,
            wire_id,
            node.class.name()
        );

        let skippable = r.remaining() >= 4 && r.peek_u32()? == SKIP;
        let slot = if skippable {
            read_skippable(r, node, wire_id, chunk_id, info)?
        } else {
            read_plain(r, node, wire_id, chunk_id, info)?
        };

        node.chunks.push(slot);
    }

    Ok(())
}

fn read_skippable(
    r: &mut GbxReader<'_>,
    node: &mut Node,
    wire_id: u32,
    chunk_id: u32,
    info: Option<&'static ChunkInfo>,
) -> Result<ChunkSlot, GbxError> {
    let _skip = r.read_u32::<LE>().context("Reading SKIP marker")?;
    let position = r.position();
    let size = r.read_u32::<LE>().context("Reading skippable chunk size")? as usize;
    if size > r.remaining() {
        return Err(GbxErrorInner::SizeValidation {
            length: size as i64,
            position,
            limit: r.remaining(),
        }
        .into());
    }

    let start = r.checkpoint();
    let mut slot = ChunkSlot {
        id: wire_id,
        skippable: true,
        version: 0,
        raw: None,
    };

    match info {
        Some(info) if !info.ignored => {
            match read_layout(r, &mut node.class, chunk_id, info) {
                Ok(version) => {
                    slot.version = version;
                    let consumed = (r.position() - start.position()) as usize;
                    if consumed != size {
                        tracing::warn!(
                            "Chunk {:08x} declared {} bytes but its layout read {}",
                            chunk_id,
                            size,
                            consumed
                        );
                        r.rewind(start);
                        slot.raw = Some(r.read_raw(size)?.to_vec());
                    }
                }

                Err(err) if matches!(&*err, GbxErrorInner::Cancelled) => return Err(err),

                Err(err) => {
                    tracing::warn!("Skipping chunk {:08x} after error: {}", chunk_id, err);
                    r.rewind(start);
                    slot.raw = Some(r.read_raw(size)?.to_vec());
                }
            }
        }

        _ => {
            if info.is_none() {
                tracing::warn!(
                    "Unknown skippable chunk {:08x} of {}, keeping {} bytes",
                    chunk_id,
                    node.class.name(),
                    size
                );
            }
            slot.raw = Some(r.read_raw(size)?.to_vec());
        }
    }

    Ok(slot)
}

fn read_plain(
    r: &mut GbxReader<'_>,
    node: &mut Node,
    wire_id: u32,
    chunk_id: u32,
    info: Option<&'static ChunkInfo>,
) -> Result<ChunkSlot, GbxError> {
    let Some(info) = info else {
        return Err(GbxErrorInner::UnrecoverableChunk {
            chunk_id: wire_id,
            class_id: node.class_id(),
        }
        .into());
    };

    let mut slot = ChunkSlot {
        id: wire_id,
        skippable: false,
        version: 0,
        raw: None,
    };

    if info.ignored {
        tracing::trace!("ignored chunk {:08x}, reading to node end", chunk_id);
        slot.raw = Some(r.read_till_facade()?);
    } else {
        slot.version = read_layout(r, &mut node.class, chunk_id, info)?;
    }

    Ok(slot)
}

fn read_layout(
    r: &mut GbxReader<'_>,
    class: &mut Class,
    chunk_id: u32,
    info: &ChunkInfo,
) -> Result<i32, GbxError> {
    let mut rw = ReaderWriter::reader(r).for_chunk(chunk_id, info.version.unwrap_or(0));
    class
        .read_write_chunk(chunk_id, &mut rw)
        .with_context(|| format!("Reading chunk {:08x} of {}", chunk_id, class.name()))?;
    Ok(rw.version())
}

/// Writes the chunks of `node` in order, then the node terminator.
pub(crate) fn write_chunks(w: &mut GbxWriter, node: &mut Node) -> Result<(), GbxError> {
    let slots = std::mem::take(&mut node.chunks);
    let result = write_slots(w, &mut node.class, &slots);
    node.chunks = slots;
    result?;

    w.write_u32::<LE>(FACADE)?;
    Ok(())
}

fn write_slots(w: &mut GbxWriter, class: &mut Class, slots: &[ChunkSlot]) -> Result<(), GbxError> {
    for slot in slots {
        w.write_u32::<LE>(slot.id)?;

        let size_position = if slot.skippable {
            w.write_u32::<LE>(SKIP)?;
            let position = w.position();
            w.write_u32::<LE>(0)?;
            Some(position)
        } else {
            None
        };

        let start = w.position();
        match &slot.raw {
            Some(raw) => w.write_raw(raw)?,
            None => {
                let chunk_id = canonical_chunk_id(slot.id);
                let mut rw = ReaderWriter::writer(w).for_chunk(chunk_id, slot.version);
                class
                    .read_write_chunk(chunk_id, &mut rw)
                    .with_context(|| {
                        format!("Writing chunk {:08x} of {}", chunk_id, class.name())
                    })?;
            }
        }

        if let Some(size_position) = size_position {
            let size = (w.position() - start) as u32;
            w.patch_u32(size_position, size)?;
        }
    }

    Ok(())
}

/// Decodes one header chunk into the root node's class.
pub(crate) fn read_header_chunk(
    r: &mut GbxReader<'_>,
    class: &mut Class,
    chunk_id: u32,
    info: &ChunkInfo,
) -> Result<i32, GbxError> {
    read_layout(r, class, chunk_id, info)
}

/// Encodes one header chunk from the root node's class.
pub(crate) fn write_header_chunk(
    w: &mut GbxWriter,
    class: &mut Class,
    chunk_id: u32,
    version: i32,
) -> Result<(), GbxError> {
    let mut rw = ReaderWriter::writer(w).for_chunk(chunk_id, version);
    class
        .read_write_chunk(chunk_id, &mut rw)
        .with_context(|| format!("Writing header chunk {:08x}", chunk_id))
}
