//! End-to-end archive round trips across the four container families.

use std::io::Cursor;
use std::sync::Arc;

use danmaku_dat::{detect, Archive, DatError, Version};
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rstest::rstest;

fn build(version: Version, files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let archive = Archive::create(version, Cursor::new(Vec::new()), files.len()).unwrap();
    for (i, (name, body)) in files.iter().enumerate() {
        archive.entry_set_name(i, name).unwrap();
        archive.entry_write_data(i, body).unwrap();
    }
    archive.close().unwrap().into_inner()
}

fn check_round_trip(version: Version, files: &[(&str, Vec<u8>)]) {
    let bytes = build(version, files);
    let archive = Archive::open(version, Cursor::new(bytes)).unwrap();

    assert_eq!(archive.entry_count(), files.len());
    for (name, body) in files {
        let index = archive.entry_by_name(name).unwrap_or_else(|| {
            panic!("entry {name} missing after round trip");
        });
        let back = archive.entry_read_data(index).unwrap();
        assert_eq!(&back, body, "body mismatch for {name}");
    }
}

fn sample_bodies() -> Vec<Vec<u8>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x1157);
    vec![
        b"hello".to_vec(),
        vec![0u8; 2048],
        (0..1500u32).map(|i| (i % 251) as u8).collect(),
        (0..4096).map(|_| rng.gen()).collect(),
    ]
}

#[rstest]
#[case::th02(Version::Th02)]
#[case::th03(Version::Th03)]
#[case::th05(Version::Th05)]
fn legacy_archives_round_trip(#[case] version: Version) {
    let bodies = sample_bodies();
    let files: Vec<(&str, Vec<u8>)> = vec![
        ("A.TXT", bodies[0].clone()),
        ("ZERO.DAT", bodies[1].clone()),
        ("CYCLE.ANM", bodies[2].clone()),
        ("NOISE.ECL", bodies[3].clone()),
    ];
    check_round_trip(version, &files);
}

#[rstest]
#[case::th06(Version::Th06)]
#[case::th07(Version::Th07)]
fn bitpacked_archives_round_trip(#[case] version: Version) {
    let bodies = sample_bodies();
    let files: Vec<(&str, Vec<u8>)> = vec![
        ("ascii.anm", bodies[2].clone()),
        ("ecldata1.ecl", bodies[3].clone()),
        ("title.jpg", bodies[0].clone()),
    ];
    check_round_trip(version, &files);
}

#[rstest]
#[case::th08(Version::Th08)]
#[case::th09(Version::Th09)]
fn marked_archives_round_trip(#[case] version: Version) {
    let bodies = sample_bodies();
    let files: Vec<(&str, Vec<u8>)> = vec![
        ("stage1.anm", bodies[2].clone()),
        ("stage1.ecl", bodies[3].clone()),
        ("music.wav", bodies[1].clone()),
        ("readme.txt", bodies[0].clone()),
        ("whatever.bin", bodies[0].clone()),
    ];
    check_round_trip(version, &files);
}

#[rstest]
#[case::th095(Version::Th095)]
#[case::th10(Version::Th10)]
#[case::th12(Version::Th12)]
#[case::th13(Version::Th13)]
#[case::th14(Version::Th14)]
#[case::th17(Version::Th17)]
fn mainline_archives_round_trip(#[case] version: Version) {
    let bodies = sample_bodies();
    let files: Vec<(&str, Vec<u8>)> = vec![
        ("st01.ecl", bodies[3].clone()),
        ("st01a.anm", bodies[2].clone()),
        ("text.anm", bodies[1].clone()),
        ("help.txt", bodies[0].clone()),
    ];
    check_round_trip(version, &files);
}

#[test]
fn single_entry_mainline_archive() {
    let bytes = build(Version::Th14, &[("a", b"hello".to_vec())]);

    let archive = Archive::open(Version::Th14, Cursor::new(bytes)).unwrap();
    assert_eq!(archive.entry_count(), 1);
    let info = archive.entry_info(0).unwrap();
    assert_eq!(info.name(), "a");
    assert_eq!(archive.entry_read_data(0).unwrap(), b"hello");
}

#[test]
fn incompressible_bodies_are_stored_raw() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let noise: Vec<u8> = (0..512).map(|_| rng.gen()).collect();
    let bytes = build(Version::Th10, &[("noise.bin", noise.clone())]);

    let archive = Archive::open(Version::Th10, Cursor::new(bytes)).unwrap();
    let info = archive.entry_info(0).unwrap();
    assert_eq!(info.stored_size(), info.size(), "raw storage expected");
    assert_eq!(archive.entry_read_data(0).unwrap(), noise);
}

#[test]
fn mainline_archives_detect_after_close() {
    let bytes = build(Version::Th11, &[("a.ecl", b"x".to_vec())]);
    let (set, _) = detect(&bytes[..16]);
    assert!(set.contains(Version::Th11));
    assert!(!set.contains(Version::Th07));
}

#[test]
fn names_are_normalised_at_set_time() {
    let archive = Archive::create(Version::Th02, Cursor::new(Vec::new()), 1).unwrap();
    archive.entry_set_name(0, "path/to/stage1.dat").unwrap();
    assert_eq!(archive.entry_info(0).unwrap().name(), "STAGE1.DAT");

    assert!(matches!(
        archive.entry_set_name(0, "toolongbasename.dat"),
        Err(DatError::NameNotNormalisable(_))
    ));
}

#[test]
fn entries_keep_indices_across_parallel_writes() {
    // Write entries from several threads in scrambled order; after close
    // and re-open every name still maps to its own body.
    let names: Vec<String> = (0..16).map(|i| format!("file{i:02}.bin")).collect();
    let bodies: Vec<Vec<u8>> = (0..16u8)
        .map(|i| (0..900).map(|j| i.wrapping_mul(37).wrapping_add(j as u8)).collect())
        .collect();

    let archive = Arc::new(Archive::create(Version::Th13, Cursor::new(Vec::new()), 16).unwrap());
    for (i, name) in names.iter().enumerate() {
        archive.entry_set_name(i, name).unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..4 {
        let archive = Arc::clone(&archive);
        let bodies = bodies.clone();
        handles.push(std::thread::spawn(move || {
            for i in (0..16).filter(|i| i % 4 == worker) {
                archive.entry_write_data(i, &bodies[i]).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let archive = Arc::into_inner(archive).unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let reopened = Archive::open(Version::Th13, Cursor::new(bytes)).unwrap();
    assert_eq!(reopened.entry_count(), 16);
    for (i, name) in names.iter().enumerate() {
        let index = reopened.entry_by_name(name).unwrap();
        assert_eq!(reopened.entry_read_data(index).unwrap(), bodies[i]);
    }
}
