//! End-to-end workflow tests for encounter-cli.
//!
//! These tests chain several commands the way a user would: build an index,
//! compare against it, then identify the three encounter slots.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use image::{DynamicImage, GenericImage, GrayImage, Luma};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a Command for the encounter binary.
fn encounter() -> Command {
    cargo_bin_cmd!("encounter").into()
}

fn monster(size: u32, seed: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        let cell = (x / 8) * 131 + (y / 8) * 977 + seed * 7919;
        Luma([(cell.wrapping_mul(2654435761) >> 24) as u8])
    })
}

fn save(path: &Path, image: &GrayImage) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    DynamicImage::ImageLuma8(image.clone()).save(path).unwrap();
}

/// A database of three monsters under `resources/`, returned with the
/// monster images in database order.
fn setup_database(temp: &TempDir) -> (PathBuf, Vec<GrayImage>) {
    let resources = temp.path().join("resources");
    let monsters: Vec<GrayImage> = (1..=3).map(|seed| monster(120, seed)).collect();
    for (name, image) in ["slime", "bat", "golem"].iter().zip(&monsters) {
        save(&resources.join(format!("images/{name}.png")), image);
    }
    let db = resources.join("monsters_db.json");
    fs::write(
        &db,
        r#"{
            "slime": { "image": "images/slime.png", "available": "Day 1" },
            "bat": { "image": "images/bat.png", "available": "Day 1" },
            "golem": { "image": "images/golem.png", "available": "Day 10" }
        }"#,
    )
    .unwrap();
    (db, monsters)
}

// ============================================================================
// Index -> Compare -> Recognize
// ============================================================================

#[test]
fn test_e2e_index_then_compare_with_index() {
    let temp = TempDir::new().unwrap();
    let (db, monsters) = setup_database(&temp);
    let index = temp.path().join("cache/index.json");

    // Step 1: Build the index
    encounter()
        .arg("index")
        .arg("--db")
        .arg(&db)
        .arg("-o")
        .arg(&index)
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries: 3"));
    assert!(index.exists(), "Index file should exist after indexing");

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&index).unwrap()).unwrap();
    assert_eq!(saved["version"], 2);
    assert_eq!(saved["entries"].as_array().unwrap().len(), 3);

    // Step 2: Compare a crop of "bat" using the index
    let query = temp.path().join("query.png");
    let crop = GrayImage::from_fn(80, 80, |x, y| *monsters[1].get_pixel(x + 20, y + 20));
    save(&query, &crop);

    let output = encounter()
        .arg("compare")
        .arg(&query)
        .arg("--db")
        .arg(&db)
        .arg("--index")
        .arg(&index)
        .args(["--phash-threshold", "64", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report[0]["reference_id"], "bat");
    assert!(report[0]["phash_distance"].is_u64());
}

#[test]
fn test_e2e_split_then_recognize() {
    let temp = TempDir::new().unwrap();
    let (db, monsters) = setup_database(&temp);

    // Screen shows golem, slime, bat
    let mut screen = GrayImage::from_pixel(360, 120, Luma([0]));
    for (slot, which) in [2usize, 0, 1].into_iter().enumerate() {
        screen.copy_from(&monsters[which], slot as u32 * 120, 0).unwrap();
    }
    let screenshot = temp.path().join("screen.png");
    save(&screenshot, &screen);

    // Split produces the three slot images
    encounter().arg("split").arg(&screenshot).assert().success();
    for suffix in ["left", "mid", "right"] {
        assert!(temp.path().join(format!("screen_{suffix}.png")).exists());
    }

    // Recognize identifies every slot in order
    let output = encounter()
        .arg("recognize")
        .arg(&screenshot)
        .arg("--db")
        .arg(&db)
        .args(["-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let slots: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<_> = slots
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["position"].as_u64().unwrap(), s["reference_id"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(
        ids,
        [(1, "golem".to_string()), (2, "slime".to_string()), (3, "bat".to_string())]
    );
}

#[test]
fn test_e2e_day_filter_excludes_late_monsters() {
    let temp = TempDir::new().unwrap();
    let (db, monsters) = setup_database(&temp);

    let mut screen = GrayImage::from_pixel(360, 120, Luma([0]));
    screen.copy_from(&monsters[2], 0, 0).unwrap();
    let screenshot = temp.path().join("screen.png");
    save(&screenshot, &screen);

    encounter()
        .arg("recognize")
        .arg(&screenshot)
        .arg("--db")
        .arg(&db)
        .args(["--day", "Day 1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("golem").not());
}

#[test]
fn test_e2e_stale_index_rejected() {
    let temp = TempDir::new().unwrap();
    let (db, _) = setup_database(&temp);
    let index = temp.path().join("index.json");
    fs::write(
        &index,
        r#"{ "version": 99, "algorithm": "phash", "created_at": "2024-01-01T00:00:00Z", "entries": [] }"#,
    )
    .unwrap();

    encounter()
        .arg("check")
        .arg("--db")
        .arg(&db)
        .assert()
        .success();

    encounter()
        .arg("compare")
        .arg(temp.path().join("whatever.png"))
        .arg("--db")
        .arg(&db)
        .arg("--index")
        .arg(&index)
        .assert()
        .code(66)
        .stderr(predicate::str::contains("unsupported index version"));
}
