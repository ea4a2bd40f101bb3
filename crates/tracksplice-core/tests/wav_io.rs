use std::path::Path;

use tempfile::tempdir;
use tracksplice_core::{Session, wav};

/// Canonical 44-byte mono 16-bit 8 kHz header followed by `samples`.
fn write_raw_wav(path: &Path, samples: &[i16]) {
    let data_len = u32::try_from(samples.len() * 2).expect("test payload fits in u32");
    let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16_u32.to_le_bytes());
    bytes.extend_from_slice(&1_u16.to_le_bytes());
    bytes.extend_from_slice(&1_u16.to_le_bytes());
    bytes.extend_from_slice(&8_000_u32.to_le_bytes());
    bytes.extend_from_slice(&16_000_u32.to_le_bytes());
    bytes.extend_from_slice(&2_u16.to_le_bytes());
    bytes.extend_from_slice(&16_u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, bytes).expect("raw wav should be writable");
}

#[test]
fn fixed_header_files_load() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("raw.wav");
    write_raw_wav(&path, &[3, -3, 300, -300]);

    assert_eq!(
        wav::load(&path).expect("load should succeed"),
        vec![3, -3, 300, -300]
    );
}

#[test]
fn saved_files_use_the_canonical_header() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("saved.wav");
    let samples = [1_i16, -2, 3];
    wav::save(&path, &samples).expect("save should succeed");

    let bytes = std::fs::read(&path).expect("saved wav should be readable");
    assert_eq!(bytes.len(), 44 + samples.len() * 2);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[24..28], &8_000_u32.to_le_bytes());
    assert_eq!(&bytes[40..44], &6_u32.to_le_bytes());
    assert_eq!(&bytes[44..46], &1_i16.to_le_bytes());
}

#[test]
fn spliced_track_survives_a_wav_round_trip() {
    let temp = tempdir().expect("tempdir should be creatable");
    let src_path = temp.path().join("src.wav");
    let dest_path = temp.path().join("dest.wav");
    let out_path = temp.path().join("out").join("spliced.wav");
    write_raw_wav(&src_path, &[5, 6, 7, 8]);
    write_raw_wav(&dest_path, &[1, 2]);

    let mut session = Session::new();
    let src = session
        .load_samples(&wav::load(&src_path).expect("src load"))
        .expect("src track");
    let dest = session
        .load_samples(&wav::load(&dest_path).expect("dest load"))
        .expect("dest track");
    session.insert(src, dest, 1, 1, 2).expect("insert should succeed");

    let spliced = session
        .read(dest, 0, session.length(dest).expect("track exists"))
        .expect("read should succeed");
    wav::save(&out_path, &spliced).expect("save should succeed");
    assert_eq!(
        wav::load(&out_path).expect("reload should succeed"),
        vec![1, 6, 7, 2]
    );
}

#[test]
fn missing_file_error_names_the_path() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("absent.wav");

    let error = wav::load(&path).expect_err("missing file must fail");
    assert!(format!("{error:#}").contains("absent.wav"));
}
