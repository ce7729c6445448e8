//! Batch discovery and bounded execution of export sessions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::config::{ExportConfig, VideoCodec};
use crate::foundation::error::{MuxError, MuxResult};
use crate::session::run_session;
use crate::source::SourceSpec;

/// One session to run: already-resolved inputs and the output location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTask {
    pub source: SourceSpec,
    pub output: PathBuf,
}

impl MergeTask {
    pub fn track_pair(
        color: impl Into<PathBuf>,
        mask: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: SourceSpec::TrackPair {
                color: color.into(),
                mask: mask.into(),
            },
            output: output.into(),
        }
    }

    pub fn animated_image(path: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: SourceSpec::AnimatedImage { path: path.into() },
            output: output.into(),
        }
    }
}

/// A color video and its mask found next to each other during a batch walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMaskPair {
    /// Name of the directory holding the pair; batch outputs are named after it.
    pub name: String,
    pub source: PathBuf,
    pub mask: PathBuf,
}

/// Walk `root` recursively in sorted order and pair every `<name><source_suffix>` file with
/// `<name><mask_suffix>` in the same directory. Sources without a mask are logged and skipped.
///
/// Each pair is named after the directory it was found in.
#[tracing::instrument]
pub fn find_source_mask_pairs(
    root: &Path,
    source_suffix: &str,
    mask_suffix: &str,
) -> MuxResult<Vec<SourceMaskPair>> {
    if source_suffix.is_empty() || mask_suffix.is_empty() {
        return Err(MuxError::validation("source and mask suffixes must be non-empty"));
    }
    if source_suffix == mask_suffix {
        return Err(MuxError::validation("source and mask suffixes must differ"));
    }
    let mut pairs = Vec::new();
    walk(root, source_suffix, mask_suffix, &mut pairs)?;
    Ok(pairs)
}

fn walk(
    dir: &Path,
    source_suffix: &str,
    mask_suffix: &str,
    pairs: &mut Vec<SourceMaskPair>,
) -> MuxResult<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("read directory '{}'", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("list directory '{}'", dir.display()))?;
    entries.sort();
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for path in entries {
        if path.is_dir() {
            walk(&path, source_suffix, mask_suffix, pairs)?;
            continue;
        }
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(source_suffix) else {
            continue;
        };
        if stem.is_empty() {
            continue;
        }
        let mask = dir.join(format!("{stem}{mask_suffix}"));
        if !mask.is_file() {
            tracing::warn!(source = %path.display(), expected = %mask.display(), "missing mask file, skipping");
            continue;
        }
        if dir_name.is_empty() {
            tracing::warn!(source = %path.display(), "pair directory has no name, skipping");
            continue;
        }
        pairs.push(SourceMaskPair {
            name: dir_name.clone(),
            source: path.clone(),
            mask,
        });
    }
    Ok(())
}

/// One task per pair, writing `<out_dir>/<name>.<codec extension>`.
///
/// Pairs in one directory, or in equally named ones, share a name; the first one in walk order
/// keeps the output and the rest are logged and dropped.
pub fn batch_tasks(pairs: &[SourceMaskPair], out_dir: &Path, codec: VideoCodec) -> Vec<MergeTask> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let output = out_dir.join(format!("{}.{}", pair.name, codec.extension()));
        if !seen.insert(output.clone()) {
            tracing::warn!(source = %pair.source.display(), output = %output.display(), "duplicate output name, skipping");
            continue;
        }
        tasks.push(MergeTask::track_pair(&pair.source, &pair.mask, output));
    }
    tasks
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub task: MergeTask,
    pub result: MuxResult<()>,
}

/// Per-task results of a batch, in task order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn merged(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.merged()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Run `tasks` with at most `jobs` sessions in flight, using `run` for each one.
pub fn run_tasks_with<F>(tasks: Vec<MergeTask>, jobs: usize, run: F) -> BatchReport
where
    F: Fn(&MergeTask) -> MuxResult<()> + Sync,
{
    let jobs = jobs.clamp(1, tasks.len().max(1));
    let (work_tx, work_rx) = crossbeam_channel::unbounded::<(usize, MergeTask)>();
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, TaskOutcome)>();
    let total = tasks.len();
    for item in tasks.into_iter().enumerate() {
        let _ = work_tx.send(item);
    }
    drop(work_tx);

    std::thread::scope(|scope| {
        for _ in 0..jobs {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let run = &run;
            scope.spawn(move || {
                for (index, task) in work_rx.iter() {
                    let result = run(&task);
                    match &result {
                        Ok(()) => tracing::info!(output = %task.output.display(), "merged"),
                        Err(err) => tracing::warn!(output = %task.output.display(), error = %err, "merge failed"),
                    }
                    let _ = done_tx.send((index, TaskOutcome { task, result }));
                }
            });
        }
    });
    drop(done_tx);

    let mut outcomes: Vec<(usize, TaskOutcome)> = done_rx.iter().collect();
    outcomes.sort_by_key(|(index, _)| *index);
    debug_assert_eq!(outcomes.len(), total);
    BatchReport {
        outcomes: outcomes.into_iter().map(|(_, o)| o).collect(),
    }
}

/// Run `tasks` as export sessions with at most `jobs` in flight.
pub fn run_tasks(tasks: Vec<MergeTask>, jobs: usize, cfg: &ExportConfig) -> BatchReport {
    run_tasks_with(tasks, jobs, |task| run_session(&task.source, &task.output, cfg))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn runner_respects_the_concurrency_bound() {
        let tasks: Vec<_> = (0..8)
            .map(|i| MergeTask::animated_image(format!("in{i}.png"), format!("out{i}.mov")))
            .collect();
        let live = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let report = run_tasks_with(tasks, 3, |task| {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            live.fetch_sub(1, Ordering::SeqCst);
            if task.output.ends_with("out5.mov") {
                Err(MuxError::Cancelled)
            } else {
                Ok(())
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(report.merged(), 7);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[5].task.output, PathBuf::from("out5.mov"));
    }

    #[test]
    fn suffixes_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_source_mask_pairs(dir.path(), "", "_alpha.mp4").is_err());
        assert!(find_source_mask_pairs(dir.path(), "_a.mp4", "_a.mp4").is_err());
    }
}
