use std::path::{Path, PathBuf};

use alphamux::dispatch::{batch_tasks, find_source_mask_pairs, run_tasks};
use alphamux::{ExportConfig, MergeTask, MuxError, SourceSpec, VideoCodec};

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

#[test]
fn pairs_are_found_recursively_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = &dir.path().join("in");
    touch(&root.join("b/clip_sozai.mp4"));
    touch(&root.join("b/clip_alpha.mp4"));
    touch(&root.join("a/deeper/intro_sozai.mp4"));
    touch(&root.join("a/deeper/intro_alpha.mp4"));
    touch(&root.join("a/orphan_sozai.mp4"));
    touch(&root.join("top_sozai.mp4"));
    touch(&root.join("top_alpha.mp4"));
    touch(&root.join("notes.txt"));

    let pairs = find_source_mask_pairs(root, "_sozai.mp4", "_alpha.mp4").unwrap();
    let names: Vec<_> = pairs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["deeper", "b", "in"]);
    assert_eq!(pairs[1].source, root.join("b/clip_sozai.mp4"));
    assert_eq!(pairs[1].mask, root.join("b/clip_alpha.mp4"));
}

#[test]
fn mask_in_another_directory_does_not_count() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    touch(&root.join("x/shot_sozai.mp4"));
    touch(&root.join("y/shot_alpha.mp4"));
    assert!(find_source_mask_pairs(root, "_sozai.mp4", "_alpha.mp4").unwrap().is_empty());
}

#[test]
fn batch_outputs_are_named_after_the_pair_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("in");
    touch(&root.join("one/shot_sozai.mp4"));
    touch(&root.join("one/shot_alpha.mp4"));
    touch(&root.join("two/shot_sozai.mp4"));
    touch(&root.join("two/shot_alpha.mp4"));
    touch(&root.join("two/other_sozai.mp4"));
    touch(&root.join("two/other_alpha.mp4"));

    let pairs = find_source_mask_pairs(&root, "_sozai.mp4", "_alpha.mp4").unwrap();
    assert_eq!(pairs.len(), 3);
    let out = PathBuf::from("/render/out");
    let tasks = batch_tasks(&pairs, &out, VideoCodec::Vp9);
    let outputs: Vec<_> = tasks.iter().map(|t| t.output.clone()).collect();
    assert_eq!(outputs, vec![out.join("one.webm"), out.join("two.webm")]);
    assert_eq!(
        tasks[0].source,
        SourceSpec::TrackPair {
            color: root.join("one/shot_sozai.mp4"),
            mask: root.join("one/shot_alpha.mp4"),
        }
    );
    // both pairs in two/ map to two.webm; the first in walk order wins
    assert_eq!(
        tasks[1].source,
        SourceSpec::TrackPair {
            color: root.join("two/other_sozai.mp4"),
            mask: root.join("two/other_alpha.mp4"),
        }
    );
}

#[test]
fn unreadable_inputs_fail_their_task_without_leaving_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out").join("x.mov");
    let tasks = vec![MergeTask::track_pair(
        dir.path().join("missing_sozai.mp4"),
        dir.path().join("missing_alpha.mp4"),
        &out,
    )];

    let report = run_tasks(tasks, 2, &ExportConfig::default());
    assert_eq!(report.merged(), 0);
    assert_eq!(report.failed(), 1);
    let failure = report.failures().next().unwrap();
    assert!(matches!(failure.result, Err(MuxError::Construction(_))));
    assert!(!out.exists());
}
