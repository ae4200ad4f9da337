use byteorder::{WriteBytesExt, LE};
use gbx_rs::{
    catalog::{
        Block, CGameCtnBlockSkin, CGameCtnChallenge, CGameCtnCollectorList, CGameCtnGhost,
        CGameGhost, CPlugMaterialUserInst, CPlugSolid2Model, GhostSamples,
    },
    ChunkSlot, Codec, Compression, Gbx, GbxReader, GbxWriter, Id, Meta, Node, NodeRef, Settings,
    Zlib, FACADE, SKIP,
};
use std::{
    io::Write,
    sync::{atomic::AtomicBool, Arc},
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Version 6 document with no header chunks, no external references and an
/// uncompressed body.
fn document(class_id: u32, num_nodes: u32, body: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.write_all(b"GBX").unwrap();
    data.write_u16::<LE>(6).unwrap();
    data.write_all(b"BUUR").unwrap();
    data.write_u32::<LE>(class_id).unwrap();
    data.write_u32::<LE>(0).unwrap();
    data.write_u32::<LE>(num_nodes).unwrap();
    data.write_u32::<LE>(0).unwrap();
    data.write_all(body).unwrap();
    data
}

fn string(data: &mut Vec<u8>, value: &str) {
    data.write_u32::<LE>(value.len() as u32).unwrap();
    data.write_all(value.as_bytes()).unwrap();
}

fn hiding_group_chunk(body: &mut Vec<u8>, name: &str, count: i32) {
    body.write_u32::<LE>(0x090fd001).unwrap();
    body.write_i32::<LE>(0).unwrap();
    body.write_u32::<LE>(3).unwrap();
    body.write_u32::<LE>(0x4000_0000).unwrap();
    string(body, name);
    body.write_i32::<LE>(count).unwrap();
}

#[test]
fn versioned_chunk_and_unknown_skippable_chunk() {
    init_tracing();

    let mut body = Vec::new();
    hiding_group_chunk(&mut body, "Road", 2);
    body.write_u32::<LE>(0x090fd0ff).unwrap();
    body.write_u32::<LE>(SKIP).unwrap();
    body.write_u32::<LE>(8).unwrap();
    body.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x090fd000, 1, &body);

    let mut gbx = Gbx::read(&data).unwrap();
    let material = gbx.root_as::<CPlugMaterialUserInst>().unwrap();
    assert_eq!(material.hiding_group, "Road");
    assert_eq!(material.texture_count, 2);

    let unknown: Vec<&ChunkSlot> = gbx.root().unknown_chunks().collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].id, 0x090fd0ff);
    assert_eq!(unknown[0].raw.as_deref(), Some(&[1, 2, 3, 4, 5, 6, 7, 8][..]));

    assert_eq!(gbx.write().unwrap(), data);
}

#[test]
fn unknown_plain_chunk_is_fatal() {
    init_tracing();

    let mut body = Vec::new();
    hiding_group_chunk(&mut body, "Road", 2);
    body.write_u32::<LE>(0x090fd0fe).unwrap();
    body.write_u32::<LE>(0).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x090fd000, 1, &body);

    let err = Gbx::read(&data).unwrap_err();
    assert!(matches!(
        &*err,
        gbx_rs::GbxErrorInner::UnrecoverableChunk {
            chunk_id: 0x090fd0fe,
            class_id: 0x090fd000
        }
    ));
}

#[test]
fn skippable_chunk_with_wrong_size_is_kept() {
    init_tracing();

    let mut body = Vec::new();
    body.write_u32::<LE>(0x03092005).unwrap();
    body.write_u32::<LE>(SKIP).unwrap();
    body.write_u32::<LE>(8).unwrap();
    body.write_u32::<LE>(45_120).unwrap();
    body.write_u32::<LE>(0xdead_beef).unwrap();
    body.write_u32::<LE>(0x03092008).unwrap();
    body.write_u32::<LE>(SKIP).unwrap();
    body.write_u32::<LE>(4).unwrap();
    body.write_u32::<LE>(3).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x03092000, 1, &body);

    let mut gbx = Gbx::read(&data).unwrap();
    assert_eq!(gbx.root().unknown_chunks().count(), 1);
    assert_eq!(gbx.root_as::<CGameCtnGhost>().unwrap().respawns, 3);
    assert_eq!(gbx.write().unwrap(), data);
}

#[test]
fn skippable_chunk_past_the_end() {
    init_tracing();

    let mut body = Vec::new();
    body.write_u32::<LE>(0x03092005).unwrap();
    body.write_u32::<LE>(SKIP).unwrap();
    body.write_u32::<LE>(400).unwrap();
    body.write_u32::<LE>(45_120).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x03092000, 1, &body);

    let err = Gbx::read(&data).unwrap_err();
    assert!(matches!(
        &*err,
        gbx_rs::GbxErrorInner::SizeValidation { length: 400, .. }
    ));
}

fn material_chunk(version: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<LE>(0x090fd000).unwrap();
    body.write_i32::<LE>(version).unwrap();
    body.write_u32::<LE>(3).unwrap();
    body.write_u32::<LE>(0x4000_0000).unwrap();
    string(&mut body, "Road");
    body.write_u32::<LE>(0x4000_0000).unwrap();
    string(&mut body, "Tech");
    if version >= 2 {
        body.push(5);
        body.push(6);
    }
    if version >= 3 {
        body.write_u32::<LE>(0x4000_0001).unwrap();
    }
    body.write_u32::<LE>(FACADE).unwrap();
    body
}

#[test]
fn fields_appear_at_their_versions() {
    init_tracing();

    for version in 1..=4 {
        let data = document(0x090fd000, 1, &material_chunk(version));
        let mut gbx = Gbx::read(&data).unwrap();
        let material = gbx.root_as::<CPlugMaterialUserInst>().unwrap();

        assert_eq!(material.material_name, "Road", "version {version}");
        assert_eq!(material.model, "Tech", "version {version}");
        let expected_surface = if version >= 2 { (5, 6) } else { (0, 0) };
        assert_eq!(
            (material.surface_physic_id, material.surface_gameplay_id),
            expected_surface,
            "version {version}"
        );
        if version >= 3 {
            assert_eq!(material.link, "Road", "version {version}");
        } else {
            assert!(material.link.is_empty(), "version {version}");
        }

        assert_eq!(gbx.root().chunks[0].version, version);
        assert_eq!(gbx.write().unwrap(), data, "version {version}");
    }
}

#[test]
fn writing_at_version_2_omits_later_fields() {
    init_tracing();

    let mut gbx = Gbx::new(CPlugMaterialUserInst {
        material_name: Id::from("Road"),
        model: Id::from("Tech"),
        surface_physic_id: 5,
        surface_gameplay_id: 6,
        link: Id::from("Road"),
        ..Default::default()
    });
    gbx.header.body_compression = Compression::Uncompressed;
    gbx.root_mut().chunks = vec![ChunkSlot {
        id: 0x090fd000,
        skippable: false,
        version: 2,
        raw: None,
    }];

    let data = gbx.write().unwrap();
    let expected = material_chunk(2);
    assert!(data.ends_with(&expected));

    let read = Gbx::read(&data).unwrap();
    assert!(read
        .root_as::<CPlugMaterialUserInst>()
        .unwrap()
        .link
        .is_empty());
}

#[test]
fn cancelled_before_first_chunk() {
    init_tracing();

    let mut body = Vec::new();
    hiding_group_chunk(&mut body, "Road", 2);
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x090fd000, 1, &body);

    let settings = Settings {
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..Default::default()
    };
    let err = Gbx::read_with(&data, settings).unwrap_err();
    assert!(matches!(&*err, gbx_rs::GbxErrorInner::Cancelled));
}

fn ghost_samples() -> GhostSamples {
    GhostSamples {
        saved_mobil_class_id: 0x0a02b000,
        sample_period: 50,
        state_buffer: vec![0x11; 12],
        num_samples: 3,
        size_per_sample: 4,
        sample_times: vec![0, 50, 100],
        ..Default::default()
    }
}

fn ghost_document() -> Vec<u8> {
    let mut writer = GbxWriter::new(Settings::default());
    writer.write(&ghost_samples()).unwrap();
    let unpacked = writer.into_inner();
    let packed = Zlib.compress(&unpacked).unwrap();

    let mut body = Vec::new();
    body.write_u32::<LE>(0x0303f005).unwrap();
    body.write_u32::<LE>(unpacked.len() as u32).unwrap();
    body.write_u32::<LE>(packed.len() as u32).unwrap();
    body.write_all(&packed).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    document(0x0303f000, 1, &body)
}

#[test]
fn compressed_section_with_codec() {
    init_tracing();

    let data = ghost_document();
    let mut gbx = Gbx::read(&data).unwrap();
    let ghost = gbx.root_as::<CGameGhost>().unwrap();
    assert!(!ghost.samples.is_opaque());
    assert_eq!(ghost.samples.value().unwrap(), &ghost_samples());
    assert_eq!(gbx.write().unwrap(), data);
}

#[test]
fn compressed_section_without_codec() {
    init_tracing();

    let data = ghost_document();
    let settings = Settings {
        section_codec: None,
        ..Default::default()
    };
    let mut gbx = Gbx::read_with(&data, settings).unwrap();
    let ghost = gbx.root_as::<CGameGhost>().unwrap();
    assert!(ghost.samples.is_opaque());
    assert!(ghost.samples.value().is_none());
    assert_eq!(gbx.write().unwrap(), data);
}

#[test]
fn edited_section_is_recompressed() {
    init_tracing();

    let data = ghost_document();
    let mut gbx = Gbx::read(&data).unwrap();
    gbx.root_mut()
        .get_mut::<CGameGhost>()
        .unwrap()
        .samples
        .value_mut()
        .unwrap()
        .sample_period = 100;

    let edited = gbx.write().unwrap();
    assert_ne!(edited, data);
    let read = Gbx::read(&edited).unwrap();
    let samples = read.root_as::<CGameGhost>().unwrap().samples.value().unwrap();
    assert_eq!(samples.sample_period, 100);
    assert_eq!(samples.sample_times, [0, 50, 100]);
}

#[test]
fn optimized_int_widths() {
    let cases: [(u32, &[u32], usize); 4] = [
        (0, &[0], 0),
        (130, &[0, 1, 129], 1),
        (300, &[0, 299], 2),
        (70_000, &[0, 69_999], 4),
    ];

    for (max, values, width) in cases {
        let mut writer = GbxWriter::new(Settings::default());
        for &value in values {
            writer.write_optimized_int(value, max).unwrap();
        }
        let data = writer.into_inner();
        assert_eq!(data.len(), values.len() * width, "max {max}");

        let mut reader = GbxReader::new(&data, Settings::default());
        for &value in values {
            assert_eq!(reader.read_optimized_int(max).unwrap(), value);
        }
        assert_eq!(reader.remaining(), 0);
    }

    let mut writer = GbxWriter::new(Settings::default());
    assert!(writer.write_optimized_int(256, 130).is_err());
}

fn collector_list() -> CGameCtnCollectorList {
    let nadeo = Id::from("Nadeo");
    CGameCtnCollectorList {
        block_set: ["StadiumRoadMain", "StadiumPlatform", "StadiumRoadMain"]
            .into_iter()
            .map(|name| Meta {
                id: Id::from(name),
                collection: Id::Number(26),
                author: nadeo.clone(),
            })
            .collect(),
    }
}

#[test]
fn lookback_strings_are_deterministic() {
    init_tracing();

    let mut gbx = Gbx::new(collector_list());
    gbx.header.body_compression = Compression::Uncompressed;
    let first = gbx.write().unwrap();
    let second = gbx.write().unwrap();
    assert_eq!(first, second);

    // "Nadeo" was the second string seen, "StadiumRoadMain" the first
    let back_ref = 0x4000_0002u32.to_le_bytes();
    assert!(first.windows(4).any(|window| window == back_ref));
    let repeat = 0x4000_0001u32.to_le_bytes();
    assert!(first.windows(4).any(|window| window == repeat));

    let mut read = Gbx::read(&first).unwrap();
    assert_eq!(
        read.root_as::<CGameCtnCollectorList>().unwrap(),
        &collector_list()
    );
    assert_eq!(read.write().unwrap(), first);
}

#[test]
fn map_with_header_chunks_and_skinned_block() {
    init_tracing();

    let mut map = CGameCtnChallenge {
        map_info: Meta {
            id: Id::from("n9a0TBDl2gW2WMj3twWr5cE1Tbb"),
            collection: Id::Number(26),
            author: Id::from("akPfIM0aSzuHuaaDWptBbQ"),
        },
        map_name: String::from("Winter 01"),
        author_time: 24_318,
        gold_time: 26_000,
        num_checkpoints: 4,
        num_laps: 1,
        xml_data: String::from("<header type=\"map\"></header>"),
        thumbnail: vec![0xff, 0xd8, 0xff, 0xe0],
        comments: String::from("no cuts"),
        author_login: String::from("akPfIM0aSzuHuaaDWptBbQ"),
        ..Default::default()
    };
    map.blocks.push(Block {
        name: Id::from("StadiumRoadMain"),
        direction: 2,
        flags: 0x8000,
        author: Id::from("Nadeo"),
        ..Default::default()
    });

    let mut gbx = Gbx::new(map);
    let skin = gbx.insert(Node::new(CGameCtnBlockSkin {
        text: String::from("!4"),
        ..Default::default()
    }));
    gbx.root_mut()
        .get_mut::<CGameCtnChallenge>()
        .unwrap()
        .blocks[0]
        .skin = Some(NodeRef::Internal(skin));

    let data = gbx.write().unwrap();
    let mut read = Gbx::read(&data).unwrap();
    assert_eq!(read.header.chunks.len(), 6);
    assert!(read.header.chunks.iter().all(|chunk| chunk.version.is_some()));

    let map = read.root_as::<CGameCtnChallenge>().unwrap();
    assert_eq!(map.map_name, "Winter 01");
    assert_eq!(map.author_time, 24_318);
    assert_eq!(map.thumbnail, [0xff, 0xd8, 0xff, 0xe0]);
    assert_eq!(map.comments, "no cuts");

    let Some(NodeRef::Internal(skin)) = map.blocks[0].skin else {
        panic!("block skin was not read as an internal node");
    };
    let skin = read.node(skin).unwrap().get::<CGameCtnBlockSkin>().unwrap();
    assert_eq!(skin.text, "!4");

    assert_eq!(read.write().unwrap(), data);
}

/// Empty map document carrying the given header chunks.
fn map_with_header(chunks: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut user_data = Vec::new();
    user_data.write_u32::<LE>(chunks.len() as u32).unwrap();
    for (id, payload) in chunks {
        user_data.write_u32::<LE>(*id).unwrap();
        user_data.write_u32::<LE>(payload.len() as u32).unwrap();
    }
    for (_, payload) in chunks {
        user_data.write_all(payload).unwrap();
    }

    let mut data = Vec::new();
    data.write_all(b"GBX").unwrap();
    data.write_u16::<LE>(6).unwrap();
    data.write_all(b"BUUR").unwrap();
    data.write_u32::<LE>(0x03043000).unwrap();
    data.write_u32::<LE>(user_data.len() as u32).unwrap();
    data.write_all(&user_data).unwrap();
    data.write_u32::<LE>(1).unwrap();
    data.write_u32::<LE>(0).unwrap();
    data.write_u32::<LE>(FACADE).unwrap();
    data
}

#[test]
fn raw_header_chunk_leaves_no_lookback_strings() {
    init_tracing();

    let mut common = vec![0];
    common.write_u32::<LE>(3).unwrap();
    common.write_u32::<LE>(0x4000_0000).unwrap();
    string(&mut common, "Uid");
    common.write_u32::<LE>(26).unwrap();
    common.write_u32::<LE>(0x4000_0000).unwrap();
    string(&mut common, "Author");
    string(&mut common, "Map");
    common.write_u8(7).unwrap();
    // one byte past the layout
    common.write_u8(0xaa).unwrap();

    let mut map_info = vec![0];
    map_info.write_u32::<LE>(0x4000_0001).unwrap();
    map_info.write_u32::<LE>(26).unwrap();
    map_info.write_u32::<LE>(0x4000_0002).unwrap();
    string(&mut map_info, "Map");
    map_info.write_u32::<LE>(0).unwrap();

    let data = map_with_header(&[(0x03043003, common), (0x03043002, map_info)]);

    let mut gbx = Gbx::read(&data).unwrap();
    let versions: Vec<Option<i32>> = gbx.header.chunks.iter().map(|chunk| chunk.version).collect();
    assert_eq!(versions, [None, None]);
    assert!(gbx.root().chunks.is_empty());
    assert_eq!(gbx.write().unwrap(), data);
}

fn skippable(body: &mut Vec<u8>, id: u32, payload: &[u8]) {
    body.write_u32::<LE>(id).unwrap();
    body.write_u32::<LE>(SKIP).unwrap();
    body.write_u32::<LE>(payload.len() as u32).unwrap();
    body.write_all(payload).unwrap();
}

#[test]
fn raw_skippable_chunk_leaves_no_lookback_strings() {
    init_tracing();

    let mut first = Vec::new();
    first.write_u32::<LE>(1).unwrap();
    first.write_u32::<LE>(3).unwrap();
    first.write_u32::<LE>(0x4000_0000).unwrap();
    string(&mut first, "StadiumRoadMain");
    first.write_u32::<LE>(26).unwrap();
    first.write_u32::<LE>(0x4000_0000).unwrap();
    string(&mut first, "Nadeo");
    first.write_u8(0xaa).unwrap();

    let mut second = Vec::new();
    second.write_u32::<LE>(1).unwrap();
    second.write_u32::<LE>(0x4000_0001).unwrap();
    second.write_u32::<LE>(26).unwrap();
    second.write_u32::<LE>(0x4000_0002).unwrap();

    let mut body = Vec::new();
    skippable(&mut body, 0x0301b000, &first);
    skippable(&mut body, 0x0301b000, &second);
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x0301b000, 1, &body);

    let mut gbx = Gbx::read(&data).unwrap();
    let raw: Vec<Option<&[u8]>> = gbx
        .root()
        .chunks
        .iter()
        .map(|slot| slot.raw.as_deref())
        .collect();
    assert_eq!(raw, [Some(&first[..]), Some(&second[..])]);
    assert_eq!(gbx.write().unwrap(), data);
}

#[test]
fn inline_node_without_chunks() {
    init_tracing();

    let mut body = Vec::new();
    body.write_u32::<LE>(0x090bb000).unwrap();
    body.write_i32::<LE>(0).unwrap();
    body.write_u32::<LE>(1).unwrap();
    body.write_i32::<LE>(1).unwrap();
    body.write_u32::<LE>(0x09057000).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    body.write_u32::<LE>(0).unwrap();
    body.write_u32::<LE>(0).unwrap();
    body.write_u32::<LE>(FACADE).unwrap();
    let data = document(0x090bb000, 2, &body);

    let mut gbx = Gbx::read(&data).unwrap();
    let model = gbx.root_as::<CPlugSolid2Model>().unwrap();
    let Some(NodeRef::Internal(visual)) = model.visuals[0] else {
        panic!("visual was not read as an internal node");
    };
    assert!(gbx.node(visual).unwrap().chunks.is_empty());
    assert_eq!(gbx.write().unwrap(), data);
}

#[cfg(feature = "tokio")]
#[tokio::test]
async fn async_read_matches_sync_read() {
    let data = ghost_document();
    let gbx = Gbx::read_async(&mut &data[..], Settings::default())
        .await
        .unwrap();
    assert_eq!(
        gbx.root_as::<CGameGhost>().unwrap(),
        Gbx::read(&data).unwrap().root_as::<CGameGhost>().unwrap()
    );
}
