//! Save/load tests: struct trees written with `write_tree` and read back
//! with `read_tree`, in plain and MATLAB-compatible layout.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use rustyhdf5::{AttrValue, FileBuilder};
use rustyhdf5_struct::{
    read_tree, write_tree, Array, DiffOptions, Error, FieldErrorPolicy, OrderedStruct, ReadOptions, Value,
    WriteOptions,
};

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rustyhdf5_struct_storage_{}_{name}.h5", std::process::id()))
}

fn sample() -> OrderedStruct {
    let grid: Vec<f64> = (0..12_i32).map(|i| f64::from(i) * 0.25 - 1.0).collect();
    let mut s = OrderedStruct::new();
    s.set("field_a", "This is a string").unwrap();
    s.set(
        "field_b",
        Value::List(vec![
            Value::from(1),
            Value::from("string"),
            Value::from(vec![3.0, 2.1]),
        ]),
    )
    .unwrap();
    s.set("field_c", Array::from_f64(&[3, 4], grid).unwrap()).unwrap();
    s
}

fn keys(s: &OrderedStruct) -> Vec<&str> {
    s.keys().collect()
}

#[test]
fn round_trip_plain() {
    let path = temp_file("round_trip_plain");
    let original = sample();
    original
        .save_h5(&path, &WriteOptions::new().truncate_existing(true))
        .unwrap();

    let loaded = OrderedStruct::load_h5(&path, &ReadOptions::new()).unwrap();
    assert_eq!(loaded, original);
    assert_eq!(keys(&loaded), vec!["field_a", "field_b", "field_c"]);

    // Lists cannot be diffed, so compare the remaining fields.
    let mut numeric = sample();
    numeric.delete("field_b").unwrap();
    let d = numeric.diff(&loaded, &DiffOptions::default()).unwrap();
    assert_eq!(d.get("diff_norm").unwrap(), &Value::from(0.0));
    assert_eq!(d.get("diff_uncomparable").unwrap(), &Value::from(0));

    std::fs::remove_file(&path).ok();
}

#[test]
fn round_trip_matlab() {
    let path = temp_file("round_trip_matlab");
    let original = sample();
    original
        .save_mat(&path, &WriteOptions::new().truncate_existing(true))
        .unwrap();

    let loaded = OrderedStruct::load_mat(&path, &ReadOptions::new()).unwrap();
    assert_eq!(loaded, original);
    assert_eq!(loaded.get("field_c").unwrap().as_array().unwrap().shape(), &[3, 4]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn matlab_layout_reverses_axes_and_tags_classes() {
    let path = temp_file("matlab_layout");
    sample()
        .save_mat(&path, &WriteOptions::new().truncate_existing(true))
        .unwrap();

    let file = rustyhdf5::File::open(&path).unwrap();
    let ds = file.dataset("field_c").unwrap();
    assert_eq!(ds.shape().unwrap(), vec![4, 3]);
    let attrs = ds.attrs().unwrap();
    assert!(matches!(attrs.get("MATLAB_class"), Some(AttrValue::String(c)) if c == "double"));

    let list = file.group("field_b").unwrap();
    let attrs = list.attrs().unwrap();
    assert!(matches!(attrs.get("MATLAB_class"), Some(AttrValue::String(c)) if c == "cell"));

    // Plain mode keeps the row-major shape.
    let plain = OrderedStruct::load_h5(&path, &ReadOptions::new()).unwrap();
    assert_eq!(plain.get("field_c").unwrap().as_array().unwrap().shape(), &[4, 3]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn one_level_of_structs_round_trips() {
    let path = temp_file("nested_struct");
    let mut inner = OrderedStruct::new();
    inner.set("z", 3).unwrap();
    inner.set("labels", Array::from_strings(&[2], vec!["north".into(), "".into()]).unwrap()).unwrap();
    inner.set("counts", Array::from_i64(&[2, 2], vec![1, 2, 3, 4]).unwrap()).unwrap();
    inner.set("y", 2.5).unwrap();
    let mut root = OrderedStruct::new();
    root.set("inner", inner).unwrap();
    root.set("flag", 1).unwrap();

    root.save_h5(&path, &WriteOptions::new().truncate_existing(true)).unwrap();
    let loaded = read_tree(&path, &ReadOptions::new()).unwrap();
    assert_eq!(loaded, root);
    let inner = loaded.get("inner").unwrap().as_struct().unwrap();
    assert_eq!(keys(inner), vec!["z", "labels", "counts", "y"]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn merges_into_existing_file() {
    let path = temp_file("merge_existing");
    let mut first = OrderedStruct::new();
    first.set("a", 1).unwrap();
    first.set("b", 2).unwrap();
    first.save_h5(&path, &WriteOptions::new().truncate_existing(true)).unwrap();

    let mut second = OrderedStruct::new();
    second.set("c", 3).unwrap();
    second.set("b", 5).unwrap();
    second.save_h5(&path, &WriteOptions::new()).unwrap();

    let loaded = OrderedStruct::load_h5(&path, &ReadOptions::new()).unwrap();
    assert_eq!(keys(&loaded), vec!["a", "b", "c"]);
    assert_eq!(loaded.get("b").unwrap(), &Value::from(5));

    let mut only = OrderedStruct::new();
    only.set("d", 4).unwrap();
    only.save_h5(&path, &WriteOptions::new().truncate_existing(true)).unwrap();
    let loaded = OrderedStruct::load_h5(&path, &ReadOptions::new()).unwrap();
    assert_eq!(keys(&loaded), vec!["d"]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn writes_and_reads_below_a_group() {
    let path = temp_file("in_file_path");
    let mut top = OrderedStruct::new();
    top.set("version", 1).unwrap();
    top.save_h5(&path, &WriteOptions::new().truncate_existing(true)).unwrap();

    let mut run = OrderedStruct::new();
    run.set("samples", vec![0.5, 0.25]).unwrap();
    write_tree(&run, &path, &WriteOptions::new().in_file_path("/run")).unwrap();

    let loaded = read_tree(&path, &ReadOptions::new().in_file_path("/run")).unwrap();
    assert_eq!(loaded, run);
    let whole = read_tree(&path, &ReadOptions::new()).unwrap();
    assert_eq!(keys(&whole), vec!["version", "run"]);

    write_tree(&run, &path, &WriteOptions::new().in_file_path("/a/b")).unwrap();
    let nested = read_tree(&path, &ReadOptions::new().in_file_path("/a/b")).unwrap();
    assert_eq!(nested, run);

    let err = write_tree(&run, &path, &WriteOptions::new().in_file_path("/version/x")).unwrap_err();
    assert!(matches!(err, Error::Type(_)));

    std::fs::remove_file(&path).ok();
}

fn deep_tree() -> OrderedStruct {
    let mut leaf = OrderedStruct::new();
    leaf.set("x", 1).unwrap();
    leaf.set("tags", Value::List(vec![Value::from(1), Value::from("a")])).unwrap();
    let mut mid = OrderedStruct::new();
    mid.set("leaf", leaf).unwrap();
    mid.set("y", 2.0).unwrap();
    let mut element = OrderedStruct::new();
    element.set("z", 3).unwrap();
    let mut root = OrderedStruct::new();
    root.set("mid", mid).unwrap();
    root.set("top", Value::List(vec![Value::from(element), Value::from(4)])).unwrap();
    root.set("n", 5).unwrap();
    root
}

#[test]
fn deep_trees_round_trip() {
    let path = temp_file("deep_tree");
    let root = deep_tree();
    root.save_h5(&path, &WriteOptions::new().truncate_existing(true)).unwrap();

    let loaded = read_tree(&path, &ReadOptions::new()).unwrap();
    assert_eq!(loaded, root);
    assert_eq!(keys(&loaded), vec!["mid", "top", "n"]);
    let mid = loaded.get("mid").unwrap().as_struct().unwrap();
    assert_eq!(keys(mid), vec!["leaf", "y"]);

    let leaf = read_tree(&path, &ReadOptions::new().in_file_path("/mid/leaf")).unwrap();
    assert_eq!(keys(&leaf), vec!["x", "tags"]);

    // Deeper groups sit flat below the file root.
    let file = rustyhdf5::File::open(&path).unwrap();
    let groups = file.root().groups().unwrap();
    assert!(groups.iter().any(|g| g.starts_with("_tree_")), "{groups:?}");

    std::fs::remove_file(&path).ok();
}

#[test]
fn deep_trees_merge_in_place() {
    let path = temp_file("deep_merge");
    deep_tree()
        .save_h5(&path, &WriteOptions::new().truncate_existing(true))
        .unwrap();

    let mut extra = OrderedStruct::new();
    extra.set("w", 9).unwrap();
    write_tree(&extra, &path, &WriteOptions::new().in_file_path("/mid/leaf")).unwrap();

    let loaded = read_tree(&path, &ReadOptions::new()).unwrap();
    assert_eq!(keys(&loaded), vec!["mid", "top", "n"]);
    let leaf = loaded
        .get("mid")
        .unwrap()
        .as_struct()
        .unwrap()
        .get("leaf")
        .unwrap()
        .as_struct()
        .unwrap();
    assert_eq!(keys(leaf), vec!["x", "tags", "w"]);
    assert_eq!(leaf.get("w").unwrap(), &Value::from(9));

    std::fs::remove_file(&path).ok();
}

#[test]
fn merge_keeps_entries_it_cannot_load() {
    let path = temp_file("merge_unloadable");
    let mut b = FileBuilder::new();
    b.create_dataset("values").with_f64_data(&[1.0]).with_shape(&[1]);
    b.create_dataset("keep").with_f64_data(&[2.0]).with_shape(&[1]);
    b.write(&path).unwrap();

    let mut s = OrderedStruct::new();
    s.set("added", 3).unwrap();
    let err = s.save_h5(&path, &WriteOptions::new()).unwrap_err();
    assert!(matches!(err, Error::Key(_)));

    let file = rustyhdf5::File::open(&path).unwrap();
    let mut datasets = file.root().datasets().unwrap();
    datasets.sort();
    assert_eq!(datasets, vec!["keep", "values"]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn browsed_leaves_are_saved_as_arrays() {
    let source = temp_file("leaf_source");
    let target = temp_file("leaf_target");
    let data: Vec<f64> = (0..500_i32).map(f64::from).collect();
    let mut b = FileBuilder::new();
    b.create_dataset("series").with_f64_data(&data).with_shape(&[500]);
    b.write(&source).unwrap();

    let tree = rustyhdf5_struct::browse(&source, &rustyhdf5_struct::BrowseOptions::new()).unwrap();
    assert!(tree.get("series").unwrap().as_leaf().is_some());
    tree.save_h5(&target, &WriteOptions::new().truncate_existing(true)).unwrap();

    let loaded = read_tree(&target, &ReadOptions::new()).unwrap();
    let series = loaded.get("series").unwrap().as_array().unwrap();
    assert_eq!(series.shape(), &[500]);
    assert_eq!(series.to_f64().unwrap()[[499]], 499.0);

    std::fs::remove_file(&source).ok();
    std::fs::remove_file(&target).ok();
}

fn write_foreign(path: &Path) {
    let mut b = FileBuilder::new();
    b.create_dataset("good").with_f64_data(&[1.0, 2.0]).with_shape(&[2]);
    b.create_dataset("bad-name").with_f64_data(&[3.0]).with_shape(&[1]);
    b.write(path).unwrap();
}

#[test]
fn undecodable_fields_are_skipped_by_default() {
    let path = temp_file("skip_policy");
    write_foreign(&path);

    let loaded = read_tree(&path, &ReadOptions::new()).unwrap();
    assert_eq!(keys(&loaded), vec!["good"]);
    let good = loaded.get("good").unwrap().as_array().unwrap();
    assert_eq!(good.to_f64().unwrap(), ArrayD::from_shape_vec(vec![2], vec![1.0, 2.0]).unwrap());

    let err = read_tree(&path, &ReadOptions::new().policy(FieldErrorPolicy::Fail)).unwrap_err();
    assert!(matches!(err, Error::Key(_)));

    std::fs::remove_file(&path).ok();
}

#[test]
fn missing_group_is_not_found() {
    let path = temp_file("missing_group");
    write_foreign(&path);
    let err = read_tree(&path, &ReadOptions::new().in_file_path("/nope")).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    std::fs::remove_file(&path).ok();
}
