mod common;

use std::io::Cursor;
use std::sync::Arc;

use common::{CodestreamBuilder, JobLog, LoggingEntropyDecoder, Recorder};
use jpc::{CodestreamError, DecodeRequest, Decoder, PacketKey, Region, Tasks};

// Two empty packets: resolution 0 and resolution 1 of layer 0
fn two_resolutions(scod: u8, data: &[u8]) -> Vec<u8> {
    CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(scod, 0, 1, 1)
        .qcd(1)
        .tile_part(0, 0, 1, data)
        .eoc()
        .build()
}

// One packet per resolution, 8x8 with two decomposition levels
fn three_resolutions(scod: u8, tile_parts: &[&[u8]]) -> Vec<u8> {
    let mut builder = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(scod, 0, 1, 2)
        .qcd(2);
    let parts = tile_parts.len() as u8;
    for (part, data) in tile_parts.iter().enumerate() {
        builder = builder.tile_part(0, part as u8, parts, data);
    }
    builder.eoc().build()
}

fn sop(nsop: u16) -> Vec<u8> {
    let mut marker = vec![0xFF, 0x91, 0x00, 0x04];
    marker.extend(nsop.to_be_bytes());
    marker
}

fn tiled(tiles: &[u16]) -> Vec<u8> {
    let mut builder = CodestreamBuilder::new()
        .siz(16, 16, 8, 8, 1)
        .cod(0, 0, 1, 0)
        .qcd(0);
    for &tile in tiles {
        builder = builder.tile_part(tile, 0, 1, &[0x00]);
    }
    builder.eoc().build()
}

#[test]
fn test_empty_packets_complete_every_block() {
    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0, &[0x00, 0x00]))).unwrap();
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.tiles, vec![0]);
    assert_eq!(recorder.started.get(&(0, 0, 0)), Some(&1));
    assert_eq!(recorder.started.get(&(0, 0, 1)), Some(&3));
    assert_eq!(recorder.blocks, recorder.started);
    assert_eq!(recorder.resolutions, vec![(0, 0, 0), (0, 0, 1)]);
    assert_eq!(recorder.finished, vec![0]);
    assert_eq!(recorder.packets.len(), 2);

    assert_eq!(image.components.len(), 1);
    let plane = &image.components[0];
    assert_eq!((plane.width(), plane.height()), (8, 8));
    assert!(plane.samples.iter().all(|&sample| sample == 128.0));
}

#[test]
fn test_sop_and_eph_markers() {
    let mut data = vec![];
    for nsop in 0u8..2 {
        data.extend([0xFF, 0x91, 0x00, 0x04, 0x00, nsop, 0x00, 0xFF, 0x92]);
    }
    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0b110, &data))).unwrap();
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();

    let lengths: Vec<(u64, u64)> = recorder
        .packets
        .iter()
        .map(|&(_, _, header, body)| (header, body))
        .collect();
    assert_eq!(lengths, vec![(9, 0), (9, 0)]);
    assert!(recorder.corrupt.is_empty());
    assert_eq!(recorder.finished, vec![0]);
}

#[test]
fn test_missing_eph_is_fatal_when_strict() {
    let data = [0x00, 0x00];
    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0b100, &data))).unwrap();
    assert!(decoder.decode(&mut Recorder::default()).is_ok());

    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0b100, &data)))
        .unwrap()
        .with_request(DecodeRequest::new().strict(true));
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::MarkerMissing { .. })
    ));
}

#[test]
fn test_region_selects_tiles() {
    let mut decoder = Decoder::new(Cursor::new(tiled(&[0, 1, 2, 3])))
        .unwrap()
        .with_request(DecodeRequest::new().region(Region::new(0, 0, 4, 4)));
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.tiles, vec![0]);
    assert_eq!(recorder.finished, vec![0]);
    let plane = &image.components[0];
    assert_eq!(plane.region, Region::new(0, 0, 4, 4));
    assert!(plane.samples.iter().all(|&sample| sample == 128.0));
}

#[test]
fn test_missing_tile() {
    let mut decoder = Decoder::new(Cursor::new(tiled(&[0, 2, 3]))).unwrap();
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.finished, vec![0, 2, 3]);
    let plane = &image.components[0];
    assert_eq!(plane.get(0, 0), Some(128.0));
    // Tile 1 never arrived
    assert_eq!(plane.get(12, 0), Some(0.0));
    assert_eq!(plane.get(12, 12), Some(128.0));

    let mut decoder = Decoder::new(Cursor::new(tiled(&[0, 2, 3])))
        .unwrap()
        .with_request(DecodeRequest::new().strict(true));
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::TileNotFound { tile: 1 })
    ));
}

#[test]
fn test_corrupt_bitstuffing() {
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 0)
        .qcd(0)
        .tile_part(0, 0, 1, &[0xFF, 0x80])
        .eoc()
        .build();

    let mut decoder = Decoder::new(Cursor::new(codestream.clone())).unwrap();
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();
    assert_eq!(recorder.corrupt.len(), 1);
    assert_eq!(recorder.finished, vec![0]);
    assert!(image.components[0].samples.iter().all(|&sample| sample == 128.0));

    let mut decoder = Decoder::new(Cursor::new(codestream))
        .unwrap()
        .with_request(DecodeRequest::new().strict(true));
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::CorruptBitstuffing { .. })
    ));
}

#[test]
fn test_resynchronise_on_following_sop() {
    // The broken header ends right in front of the next SOP
    let mut data = sop(0);
    data.extend([0xFF, 0x80]);
    data.extend(sop(1));
    data.push(0x00);

    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0b010, &data))).unwrap();
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.corrupt, vec![(0, PacketKey::new(0, 0, 0, 0))]);
    assert_eq!(recorder.packets, vec![(0, PacketKey::new(0, 1, 0, 0), 7, 0)]);
    assert_eq!(recorder.resolutions, vec![(0, 0, 0), (0, 0, 1)]);
    assert_eq!(recorder.finished, vec![0]);
}

#[test]
fn test_resynchronise_passes_over_packets() {
    // SOP 1 is lost with the broken header, SOP 2 follows
    let mut data = sop(0);
    data.extend([0xFF, 0x80]);
    data.extend(sop(2));
    data.push(0x00);

    let mut decoder = Decoder::new(Cursor::new(three_resolutions(0b010, &[&data]))).unwrap();
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.corrupt, vec![(0, PacketKey::new(0, 0, 0, 0))]);
    assert_eq!(recorder.packets, vec![(0, PacketKey::new(0, 2, 0, 0), 7, 0)]);
    assert_eq!(recorder.blocks, recorder.started);
    assert_eq!(recorder.resolutions, vec![(0, 0, 0), (0, 0, 1), (0, 0, 2)]);
    assert_eq!(recorder.finished, vec![0]);
}

#[test]
fn test_corrupt_tile_part_skips_rest_of_tile() {
    // Without SOP markers the second tile-part cannot be placed in the
    // progression, its packet is decoded as empty
    let codestream = three_resolutions(0, &[&[0xFF, 0x80, 0x00], &[0x00]]);
    let mut decoder = Decoder::new(Cursor::new(codestream)).unwrap();
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.corrupt, vec![(0, PacketKey::new(0, 0, 0, 0))]);
    assert!(recorder.packets.is_empty());
    assert_eq!(recorder.blocks, recorder.started);
    assert_eq!(recorder.resolutions, vec![(0, 0, 0), (0, 0, 1), (0, 0, 2)]);
    assert_eq!(recorder.finished, vec![0]);
}

#[test]
fn test_block_left_out_of_last_layer_completes() {
    let mut data = vec![0xCE, 0x28];
    data.extend(0u8..10);
    // Not empty, the block is not included in layer 1
    data.push(0x80);
    let codestream = CodestreamBuilder::new()
        .siz(4, 4, 4, 4, 1)
        .cod(0, 0, 2, 0)
        .qcd(0)
        .tile_part(0, 0, 1, &data)
        .eoc()
        .build();

    let log = Arc::new(JobLog::default());
    let tasks = Tasks {
        entropy: Box::new(LoggingEntropyDecoder(log.clone())),
        ..Tasks::default()
    };
    let mut decoder = Decoder::new(Cursor::new(codestream))
        .unwrap()
        .with_tasks(tasks);
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();

    let lengths: Vec<(u64, u64)> = recorder
        .packets
        .iter()
        .map(|&(_, _, header, body)| (header, body))
        .collect();
    assert_eq!(lengths, vec![(2, 10), (1, 0)]);
    assert_eq!(recorder.started.get(&(0, 0, 0)), Some(&1));
    assert_eq!(recorder.blocks, recorder.started);
    assert_eq!(recorder.resolutions, vec![(0, 0, 0)]);
    assert_eq!(recorder.finished, vec![0]);

    let jobs = log.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    let (_, segments, codeword) = &jobs[0];
    assert_eq!(segments.iter().map(|segment| segment.1).sum::<u32>(), 10);
    assert_eq!(codeword, &(0u8..10).collect::<Vec<u8>>());
}

#[test]
fn test_layers_merge_into_one_segment() {
    let mut data = vec![0xCE, 0x28];
    data.extend(0u8..10);
    data.extend([0xD2, 0x80]);
    data.extend(10u8..15);
    let codestream = CodestreamBuilder::new()
        .siz(4, 4, 4, 4, 1)
        .cod(0, 0, 2, 0)
        .qcd(0)
        .tile_part(0, 0, 1, &data)
        .eoc()
        .build();

    let log = Arc::new(JobLog::default());
    let tasks = Tasks {
        entropy: Box::new(LoggingEntropyDecoder(log.clone())),
        ..Tasks::default()
    };
    let mut decoder = Decoder::new(Cursor::new(codestream))
        .unwrap()
        .with_tasks(tasks);
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();

    let bodies: Vec<u64> = recorder.packets.iter().map(|packet| packet.3).collect();
    assert_eq!(bodies, vec![10, 5]);

    let jobs = log.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    let (passes, segments, codeword) = &jobs[0];
    assert_eq!(*passes, 4);
    assert_eq!(segments, &vec![(4, 15)]);
    assert_eq!(codeword, &(0u8..15).collect::<Vec<u8>>());
}

#[test]
fn test_reduce_skips_top_resolution() {
    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0, &[0x00, 0x00])))
        .unwrap()
        .with_request(DecodeRequest::new().reduce(1));
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();

    assert!(!recorder.started.contains_key(&(0, 0, 1)));
    assert_eq!(recorder.resolutions, vec![(0, 0, 0)]);
    let plane = &image.components[0];
    assert_eq!((plane.width(), plane.height()), (4, 4));
}

#[test]
fn test_decode_once() {
    let mut decoder = Decoder::new(Cursor::new(two_resolutions(0, &[0x00, 0x00]))).unwrap();
    decoder.decode(&mut Recorder::default()).unwrap();
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::Validation(_))
    ));
}
