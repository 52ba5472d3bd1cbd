mod common;

use std::io::Cursor;

use common::{CodestreamBuilder, Recorder};
use jpc::marker::{
    Profile, MARKER_SYMBOL_COD, MARKER_SYMBOL_COM, MARKER_SYMBOL_QCD, MARKER_SYMBOL_SIZ,
};
use jpc::{CodestreamError, DecodeRequest, Decoder, ProgressionOrder, Region};

#[test]
fn test_main_header_info() {
    let codestream = CodestreamBuilder::new()
        .siz(128, 128, 128, 128, 1)
        .cod(0, 2, 3, 5)
        .qcd(5)
        .segment(0x64, &[0x00, 0x01, b'h', b'e', b'l', b'l', b'o'])
        .tile_part(0, 0, 1, &[])
        .eoc()
        .build();

    let decoder = Decoder::new(Cursor::new(codestream)).unwrap();
    let codestream = decoder.codestream();
    assert!(codestream.is_main_header_read());
    assert_eq!(codestream.canvas(), Region::new(0, 0, 128, 128));
    assert_eq!(codestream.no_tiles(), (1, 1));
    // SOC, SIZ, COD, QCD and COM
    assert_eq!(codestream.first_tile_part_offset(), 2 + 43 + 14 + 21 + 11);

    // Offsets are those of the length fields
    let segments: Vec<_> = codestream
        .header()
        .segments()
        .iter()
        .map(|segment| (segment.marker, segment.offset, segment.length))
        .collect();
    assert_eq!(
        segments,
        vec![
            (MARKER_SYMBOL_SIZ, 4, 41),
            (MARKER_SYMBOL_COD, 47, 12),
            (MARKER_SYMBOL_QCD, 61, 19),
            (MARKER_SYMBOL_COM, 82, 9),
        ]
    );

    let info = decoder.info();
    assert_eq!(info.capabilities.profile(), Profile::Unrestricted);
    assert_eq!(info.components.len(), 1);
    assert_eq!(info.components[0].precision(), 8);
    assert!(!info.components[0].is_signed());
    let cod = info.coding_style.unwrap();
    assert_eq!(cod.progression_order(), ProgressionOrder::Rpcl);
    assert_eq!(cod.no_layers(), 3);
    assert_eq!(cod.parameters().no_decomposition_levels(), 5);
    assert_eq!(info.comments, vec!["hello".to_string()]);
    assert!(!info.packed_packet_headers);
}

#[test]
fn test_missing_qcd() {
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 0)
        .tile_part(0, 0, 1, &[0x00])
        .eoc()
        .build();
    assert!(matches!(
        Decoder::new(Cursor::new(codestream)),
        Err(CodestreamError::MarkerMissing { .. })
    ));
}

#[test]
fn test_not_a_codestream() {
    assert!(matches!(
        Decoder::new(Cursor::new(vec![0xFF, 0xD8, 0xFF, 0xE0])),
        Err(CodestreamError::MarkerUnexpected { offset: 0, .. })
    ));
}

#[test]
fn test_packed_headers_in_main_header() {
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 1)
        .qcd(1)
        // Zppm, then Nppm and the headers of the only tile-part
        .segment(0x60, &[0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00])
        .tile_part(0, 0, 1, &[])
        .eoc()
        .build();

    let mut decoder = Decoder::new(Cursor::new(codestream)).unwrap();
    assert!(decoder.info().packed_packet_headers);
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.packets.len(), 2);
    assert!(recorder
        .packets
        .iter()
        .all(|&(_, _, header, body)| header == 0 && body == 0));
    assert_eq!(recorder.finished, vec![0]);
    assert!(image.components[0].samples.iter().all(|&sample| sample == 128.0));
}

#[test]
fn test_packed_headers_in_tile_part_header() {
    let ppt: &[u8] = &[0x00, 0x00, 0x00];
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 1)
        .qcd(1)
        .tile_part_with(0, 0, 1, &[(0x61, ppt)], &[])
        .eoc()
        .build();

    let mut decoder = Decoder::new(Cursor::new(codestream)).unwrap();
    let mut recorder = Recorder::default();
    decoder.decode(&mut recorder).unwrap();
    assert_eq!(recorder.packets.len(), 2);
    assert_eq!(recorder.resolutions, vec![(0, 0, 0), (0, 0, 1)]);
}

#[test]
fn test_ppt_with_ppm_is_rejected() {
    let ppt: &[u8] = &[0x00, 0x00, 0x00];
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 1)
        .qcd(1)
        .segment(0x60, &[0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00])
        .tile_part_with(0, 0, 1, &[(0x61, ppt)], &[])
        .eoc()
        .build();

    let mut decoder = Decoder::new(Cursor::new(codestream)).unwrap();
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::MarkerUnexpected { .. })
    ));
}

#[test]
fn test_tile_part_lengths_index() {
    // Ztlm, Stlm without Ttlm and with 16 bit Ptlm, four tile-parts of 15 bytes
    let mut tlm = vec![0x00, 0x00];
    for _ in 0..4 {
        tlm.extend(15u16.to_be_bytes());
    }
    let mut builder = CodestreamBuilder::new()
        .siz(16, 16, 8, 8, 1)
        .cod(0, 0, 1, 0)
        .qcd(0)
        .segment(0x55, &tlm);
    for tile in 0..4 {
        builder = builder.tile_part(tile, 0, 1, &[0x00]);
    }

    let mut decoder = Decoder::new(Cursor::new(builder.eoc().build()))
        .unwrap()
        .with_request(DecodeRequest::new().region(Region::new(12, 12, 16, 16)));
    let mut recorder = Recorder::default();
    let image = decoder.decode(&mut recorder).unwrap();

    assert_eq!(recorder.tiles, vec![3]);
    assert_eq!(recorder.finished, vec![3]);
    assert_eq!(image.components[0].region, Region::new(12, 12, 16, 16));
}

#[test]
fn test_region_outside_canvas() {
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 0)
        .qcd(0)
        .tile_part(0, 0, 1, &[0x00])
        .eoc()
        .build();
    let mut decoder = Decoder::new(Cursor::new(codestream))
        .unwrap()
        .with_request(DecodeRequest::new().region(Region::new(20, 20, 30, 30)));
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::Validation(_))
    ));
}

#[test]
fn test_reduce_beyond_levels() {
    let codestream = CodestreamBuilder::new()
        .siz(8, 8, 8, 8, 1)
        .cod(0, 0, 1, 0)
        .qcd(0)
        .tile_part(0, 0, 1, &[0x00])
        .eoc()
        .build();
    let mut decoder = Decoder::new(Cursor::new(codestream))
        .unwrap()
        .with_request(DecodeRequest::new().reduce(1));
    assert!(matches!(
        decoder.decode(&mut Recorder::default()),
        Err(CodestreamError::Validation(_))
    ));
}
