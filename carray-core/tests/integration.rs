//! End-to-end scenarios, one per the boundary behavior in the functional
//! specification for this container: integer range + sum, constant-chunk
//! detection, incremental append with persistence, trim on a persistent
//! array, `wheretrue` skip/limit, and boolean-mask write.

use carray_core::dtype::{DTypeKind, ElementType};
use carray_core::{CArray, CArrayOptions, Mode};

fn i32_bytes(values: impl IntoIterator<Item = i32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn read_i32(array: &mut CArray, i: usize) -> i32 {
    let row = array.get_scalar(i).unwrap();
    i32::from_le_bytes(row.try_into().unwrap())
}

#[test]
fn scenario_one_million_i32_range_and_sum() {
    let elem = ElementType::scalar(DTypeKind::I32).unwrap();
    let data = i32_bytes(0..1_000_000);
    let mut array = CArray::from_data(&data, elem, CArrayOptions::default()).unwrap();

    assert_eq!(array.len(), 1_000_000);
    assert_eq!(read_i32(&mut array, 0), 0);
    assert_eq!(read_i32(&mut array, 999_999), 999_999);
    assert_eq!(array.sum().unwrap(), 499_999_500_000.0);
}

#[test]
fn scenario_constant_chunk_of_zero_floats() {
    // 10,000 f64 zeros is 80,000 bytes, under the chunklen heuristic's single-
    // chunk cap, so the whole array lands in one chunk and `isconstant`
    // detection applies cleanly.
    let elem = ElementType::scalar(DTypeKind::F64).unwrap();
    let data: Vec<u8> = std::iter::repeat(0.0f64.to_le_bytes()).take(10_000).flatten().collect();
    let mut array = CArray::from_data(&data, elem, CArrayOptions::default()).unwrap();

    assert_eq!(array.nchunks(), 1);
    assert!(
        array.cbytes() < array.nbytes() / 10,
        "a constant chunk's cbytes should be a small fraction of nbytes: cbytes={} nbytes={}",
        array.cbytes(),
        array.nbytes()
    );
    let row = array.get_scalar(5_000).unwrap();
    assert_eq!(f64::from_le_bytes(row.try_into().unwrap()), 0.0);
    assert_eq!(array.sum().unwrap(), 0.0);
}

#[test]
fn scenario_incremental_append_then_persist_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("appended");
    let elem = ElementType::scalar(DTypeKind::U16).unwrap();
    let opts = CArrayOptions {
        chunklen: Some(256),
        root: None,
        ..Default::default()
    };
    let mut array = CArray::from_data(&[], elem.clone(), opts).unwrap();

    for i in 0..1_000u16 {
        let v = i % 7;
        array.append(&v.to_le_bytes()).unwrap();
    }
    assert_eq!(array.len(), 1_000);
    let row = array.get_scalar(257).unwrap();
    assert_eq!(u16::from_le_bytes(row.try_into().unwrap()), 257 % 7);

    // Persist the same sequence and reopen from disk.
    let raw = array.read_slice(0, array.len(), 1).unwrap();
    let persisted_opts = CArrayOptions {
        chunklen: Some(256),
        root: Some(root.clone()),
        mode: Mode::Write,
        ..Default::default()
    };
    let mut persisted = CArray::from_data(&raw, elem, persisted_opts).unwrap();
    persisted.flush().unwrap();
    drop(persisted);

    let mut reopened = CArray::open_root(&root, Mode::Read).unwrap();
    assert_eq!(reopened.len(), 1_000);
    for i in [0usize, 257, 999] {
        let row = reopened.get_scalar(i).unwrap();
        assert_eq!(u16::from_le_bytes(row.try_into().unwrap()), (i as u16) % 7);
    }
}

#[test]
fn scenario_trim_on_persistent_array() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("trimmed");
    let elem = ElementType::scalar(DTypeKind::I32).unwrap();
    let data = i32_bytes((0..5_000i32).map(|i| i * i));
    let opts = CArrayOptions {
        chunklen: Some(500),
        root: Some(root.clone()),
        mode: Mode::Write,
        ..Default::default()
    };
    let mut array = CArray::from_data(&data, elem, opts).unwrap();

    array.trim(750).unwrap();
    assert_eq!(array.len(), 4_250);
    assert_eq!(read_i32(&mut array, 4_249), 4_249 * 4_249);

    array.flush().unwrap();
    let n_files = std::fs::read_dir(root.join("data")).unwrap().count();
    assert_eq!(n_files, 9, "ceil(4250/500) chunk files expected after flush");
}

#[test]
fn scenario_wheretrue_skip_and_limit() {
    let elem = ElementType::scalar(DTypeKind::Bool).unwrap();
    let data: Vec<u8> = (0..10_000usize).map(|i| (i % 17 == 0) as u8).collect();
    let array = CArray::from_data(&data, elem, CArrayOptions::default()).unwrap();

    let hits: Result<Vec<usize>, _> = array.wheretrue(3, Some(5)).unwrap().collect();
    assert_eq!(hits.unwrap(), vec![68, 85, 102, 119, 136]);
}

#[test]
fn scenario_boolean_mask_write() {
    let elem = ElementType::scalar(DTypeKind::I8).unwrap();
    let data: Vec<u8> = (0..100i8).map(|i| (i % 4) as u8).collect();
    let mut array = CArray::from_data(&data, elem, CArrayOptions::default()).unwrap();

    let mask: Vec<bool> = (0..100usize).map(|i| (i as i8 % 4) < 2).collect();
    let true_count = mask.iter().filter(|&&b| b).count();
    let values = vec![99u8; true_count];
    array.mask_write(&mask, &values).unwrap();

    let out = array.read_slice(0, 8, 1).unwrap();
    assert_eq!(out, vec![99, 99, 2, 3, 99, 99, 2, 3]);
}

#[test]
fn appending_exactly_the_remainder_empties_the_tail() {
    let elem = ElementType::scalar(DTypeKind::U8).unwrap();
    let opts = CArrayOptions {
        chunklen: Some(16),
        ..Default::default()
    };
    let mut array = CArray::from_data(&[0u8; 10], elem, opts).unwrap();
    assert_eq!(array.nchunks(), 0);

    array.append(&vec![1u8; 6]).unwrap();
    assert_eq!(array.nchunks(), 1, "tail should have been promoted to a full chunk");
    assert_eq!(array.len(), 16);
}

#[test]
fn trim_removing_exactly_the_tail_touches_no_chunk() {
    let elem = ElementType::scalar(DTypeKind::U8).unwrap();
    let opts = CArrayOptions {
        chunklen: Some(16),
        ..Default::default()
    };
    let mut array = CArray::from_data(&vec![0u8; 20], elem, opts).unwrap();
    assert_eq!(array.nchunks(), 1);

    array.trim(4).unwrap();
    assert_eq!(array.len(), 16);
    assert_eq!(array.nchunks(), 1, "trimming only the tail must not pop a chunk");
}

#[test]
fn resize_up_fills_with_default_and_down_truncates() {
    let elem = ElementType::scalar(DTypeKind::I32).unwrap();
    let opts = CArrayOptions {
        dflt: Some(7i32.to_le_bytes().to_vec()),
        ..Default::default()
    };
    let mut array = CArray::from_data(&i32_bytes(0..10), elem, opts).unwrap();

    array.resize(15).unwrap();
    assert_eq!(array.len(), 15);
    assert_eq!(read_i32(&mut array, 12), 7);

    array.resize(3).unwrap();
    assert_eq!(array.len(), 3);
    assert_eq!(read_i32(&mut array, 2), 2);
}

#[test]
fn reshape_infers_single_negative_one_dimension() {
    let elem = ElementType::scalar(DTypeKind::F32).unwrap();
    let data: Vec<u8> = (0..24i32).flat_map(|i| (i as f32).to_le_bytes()).collect();
    let mut array = CArray::from_data(&data, elem, CArrayOptions::default()).unwrap();

    let reshaped = array.reshape(&[6, -1]).unwrap();
    assert_eq!(reshaped.len(), 6);
    assert_eq!(reshaped.elem().atom_size, 4 * 4);
}

#[test]
fn scalar_write_round_trips_through_write_slice() {
    let elem = ElementType::scalar(DTypeKind::I32).unwrap();
    let mut array = CArray::from_data(&i32_bytes(0..100), elem, CArrayOptions::default()).unwrap();

    array.write_slice(42, 43, 1, &123i32.to_le_bytes()).unwrap();
    assert_eq!(read_i32(&mut array, 42), 123);
}

#[test]
fn positive_step_slice_length_matches_ceil_div() {
    let elem = ElementType::scalar(DTypeKind::I32).unwrap();
    let mut array = CArray::from_data(&i32_bytes(0..97), elem, CArrayOptions::default()).unwrap();

    let out = array.read_slice(0, 97, 5).unwrap();
    assert_eq!(out.len() / 4, (97usize + 4) / 5);
}
