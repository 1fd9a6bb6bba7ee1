use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use image::{Rgb, RgbImage};

use sfm_trainer::baseline::BaselineDispNet;
use sfm_trainer::cli::{self, TrainArgs};
use sfm_trainer::train::checkpoint::read_saved;
use sfm_trainer::train::load_pretrained;
use sfm_trainer::train::log_writer::read_rows;
use sfm_trainer::{RunConfig, TrainableModule};

const CAM: &str = "8 0 8\n0 8 4\n0 0 1\n";

fn write_scene(root: &Path, name: &str, frames: u8) {
    let scene = root.join(name);
    fs::create_dir_all(&scene).unwrap();
    fs::write(scene.join("cam.txt"), CAM).unwrap();
    for i in 0..frames {
        let img = RgbImage::from_fn(16, 8, |x, y| {
            let v = (x * 10 + y * 5 + u32::from(i) * 20) % 256;
            Rgb([v as u8, (255 - v) as u8, 128])
        });
        img.save(scene.join(format!("{i:07}.png"))).unwrap();
    }
}

fn dataset(root: &Path) {
    write_scene(root, "scene_a", 5);
    write_scene(root, "scene_b", 5);
    write_scene(root, "scene_c", 5);
    fs::write(root.join("train.txt"), "scene_a\nscene_b\n").unwrap();
    fs::write(root.join("val.txt"), "scene_c\n").unwrap();
}

/// `<checkpoints>/<run name>/<timestamp>`; each test uses its own root.
fn only_run_dir(checkpoints: &Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = fs::read_dir(checkpoints)
        .unwrap()
        .flat_map(|named| fs::read_dir(named.unwrap().path()).unwrap())
        .map(|stamped| stamped.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1, "{dirs:?}");
    dirs.remove(0)
}

fn train_args(data: &Path, checkpoints: &Path, extra: &[&str]) -> TrainArgs {
    let mut argv = vec![
        "sfm-train".to_string(),
        data.display().to_string(),
        "--checkpoints-root".to_string(),
        checkpoints.display().to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    TrainArgs::parse_from(argv)
}

#[test]
fn trains_on_a_folder_dataset_and_writes_the_run_directory() {
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    dataset(data.path());

    let args = train_args(
        data.path(),
        checkpoints.path(),
        &["--epochs", "2", "-b", "2", "-j", "2", "--log-output"],
    );
    cli::run(args).unwrap();

    let run = only_run_dir(checkpoints.path());
    let saved = RunConfig::load_json(&run.join("config.json")).unwrap();
    assert_eq!(saved.epochs, 2);
    assert_eq!(saved.batch_size, 2);
    assert!(saved.log_output);
    assert_eq!(saved.data, data.path());

    // 6 training samples in batches of 2, for 2 epochs.
    let full = read_rows(&run.join("progress_log_full.csv")).unwrap();
    assert_eq!(full.len(), 6);
    assert!(full.iter().flatten().all(|v| v.is_finite()));
    assert_eq!(read_rows(&run.join("progress_log_summary.csv")).unwrap().len(), 2);

    let latest = read_saved(&run.join("dispnet_checkpoint.json")).unwrap();
    assert_eq!(latest.epoch, 2);
    assert!(run.join("exp_pose_checkpoint.json").is_file());
    // Best copies only appear once a later epoch improves on the first.
    assert_eq!(
        run.join("dispnet_model_best.json").is_file(),
        run.join("exp_pose_model_best.json").is_file()
    );

    let scalars = fs::read_to_string(run.join("train").join("scalars.jsonl")).unwrap();
    assert_eq!(scalars.lines().filter(|l| l.contains("\"total_loss\"")).count(), 6);
    let histograms = fs::read_to_string(run.join("valid").join("0").join("histograms.jsonl")).unwrap();
    assert_eq!(histograms.lines().count(), 12);
    assert!(run.join("valid").join("0").join("images").read_dir().unwrap().next().is_some());

    let mut fresh = BaselineDispNet::new(99);
    let loaded = load_pretrained(&mut fresh, &run.join("dispnet_checkpoint.json")).unwrap();
    assert_eq!(loaded, 2);
    assert_eq!(fresh.state(), latest.state_dict);
}

#[test]
fn evaluate_runs_one_validation_pass_on_pretrained_weights() {
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    dataset(data.path());
    cli::run(train_args(data.path(), checkpoints.path(), &["--epochs", "1", "-j", "0"])).unwrap();
    let trained = only_run_dir(checkpoints.path());

    let eval_root = tempfile::tempdir().unwrap();
    let disp = trained.join("dispnet_checkpoint.json");
    let pose = trained.join("exp_pose_checkpoint.json");
    let args = train_args(
        data.path(),
        eval_root.path(),
        &[
            "-e",
            "--pretrained-disp",
            disp.to_str().unwrap(),
            "--pretrained-exppose",
            pose.to_str().unwrap(),
        ],
    );
    cli::run(args).unwrap();

    let run = only_run_dir(eval_root.path());
    assert!(!run.join("dispnet_checkpoint.json").exists());
    assert!(!run.join("progress_log_full.csv").exists());
}

#[test]
fn evaluate_without_weights_fails_before_training() {
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    dataset(data.path());
    let err = cli::run(train_args(data.path(), checkpoints.path(), &["-e"])).unwrap_err();
    assert!(err.to_string().contains("--evaluate"), "{err}");
    assert_eq!(fs::read_dir(checkpoints.path()).unwrap().count(), 0);
}

#[test]
fn missing_dataset_is_reported() {
    let data = tempfile::tempdir().unwrap();
    let checkpoints = tempfile::tempdir().unwrap();
    assert!(cli::run(train_args(data.path(), checkpoints.path(), &["--epochs", "1"])).is_err());
}
