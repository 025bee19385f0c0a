use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::TranslateConfig;
use crate::error::{Result, Stage, SubtitleError};
use crate::shutdown::ShutdownSignal;
use crate::subtitle::{SubtitleCue, format_srt, parse_srt, wrap_cues, wrap_file};
use crate::transcribe::TRANSCRIPT_FILE;
use super::{BackendError, BackendResult, ExecutionPolicy, LanguageRole, TranslationBackend};

/// Translation of the source transcript into one target language
#[derive(Debug, Clone)]
pub struct TranslationTask {
    pub language: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Fans one source transcript out into per-language subtitle files.
///
/// The backend, and with it the execution policy, is fixed when the pipeline
/// is built.
pub struct TranslationPipeline {
    backend: Arc<dyn TranslationBackend>,
    source_language: String,
    max_attempts: u32,
    workers: usize,
    attempt_timeout: Duration,
}

impl TranslationPipeline {
    pub fn new(backend: Arc<dyn TranslationBackend>, config: &TranslateConfig, source_language: &str) -> Self {
        Self {
            backend,
            source_language: source_language.to_lowercase(),
            max_attempts: config.max_attempts.max(1),
            workers: config.parallel_workers.max(1),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.backend.policy()
    }

    /// One task per requested language except the source language.
    ///
    /// Each task writes to `<workdir>/<language>/out.srt`.
    pub fn plan(&self, source_artifact: &Path, workdir: &Path, languages: &[String]) -> Vec<TranslationTask> {
        let mut tasks: Vec<TranslationTask> = Vec::new();
        for language in languages {
            let language = language.to_lowercase();
            if language == self.source_language || tasks.iter().any(|t| t.language == language) {
                continue;
            }
            tasks.push(TranslationTask {
                destination_path: workdir.join(&language).join(TRANSCRIPT_FILE),
                source_path: source_artifact.to_path_buf(),
                attempt: 0,
                max_attempts: self.max_attempts,
                language,
            });
        }
        tasks
    }

    /// Translate `source_artifact` into every requested language.
    ///
    /// After the first failed language no further languages are started. In
    /// parallel mode the languages already in flight still run to completion.
    /// The source artifact is re-wrapped only when every language succeeded.
    pub async fn run(
        &self,
        source_artifact: &Path,
        workdir: &Path,
        languages: &[String],
        shutdown: &mut ShutdownSignal,
    ) -> Result<Vec<PathBuf>> {
        let tasks = self.plan(source_artifact, workdir, languages);
        let policy = self.policy();
        info!(
            "Translating to {} language(s) with {} ({:?})",
            tasks.len(),
            self.backend.name(),
            policy
        );

        let progress = progress_bar(tasks.len() as u64);
        let outcome = match policy {
            ExecutionPolicy::Sequential => self.run_sequential(tasks, shutdown, &progress).await,
            ExecutionPolicy::BoundedParallel => self.run_parallel(tasks, shutdown, &progress).await,
        };
        progress.finish_and_clear();
        let translated = outcome?;

        wrap_file(source_artifact).await?;
        Ok(translated)
    }

    async fn run_sequential(
        &self,
        tasks: Vec<TranslationTask>,
        shutdown: &mut ShutdownSignal,
        progress: &ProgressBar,
    ) -> Result<Vec<PathBuf>> {
        let mut translated = Vec::with_capacity(tasks.len());
        let total = tasks.len();

        for (done, task) in tasks.into_iter().enumerate() {
            if shutdown.is_triggered() {
                return Err(interrupted(&task.language, done, total - done));
            }
            let language = task.language.clone();
            let attempt = execute_task(
                self.backend.clone(),
                task,
                self.source_language.clone(),
                self.attempt_timeout,
            );
            let path = tokio::select! {
                result = attempt => result?,
                _ = shutdown.triggered() => return Err(interrupted(&language, done, total - done)),
            };
            progress.inc(1);
            translated.push(path);
        }
        Ok(translated)
    }

    async fn run_parallel(
        &self,
        tasks: Vec<TranslationTask>,
        shutdown: &mut ShutdownSignal,
        progress: &ProgressBar,
    ) -> Result<Vec<PathBuf>> {
        info!("Translating in parallel with up to {} workers", self.workers);

        let total = tasks.len();
        let languages: Vec<String> = tasks.iter().map(|t| t.language.clone()).collect();
        let mut queue = tasks.into_iter().enumerate();
        let mut workers: JoinSet<(usize, Result<PathBuf>)> = JoinSet::new();
        let mut results: Vec<(usize, Result<PathBuf>)> = Vec::with_capacity(total);
        let mut failed = false;

        loop {
            while !failed && workers.len() < self.workers {
                let Some((idx, task)) = queue.next() else {
                    break;
                };
                let backend = self.backend.clone();
                let source_language = self.source_language.clone();
                let timeout = self.attempt_timeout;
                workers.spawn(async move { (idx, execute_task(backend, task, source_language, timeout).await) });
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                joined = workers.join_next() => {
                    let Some(joined) = joined else { break };
                    let (idx, result) = joined.unwrap_or_else(|e| {
                        (usize::MAX, Err(SubtitleError::TranslationFailed {
                            language: "unknown".to_string(),
                            attempts: 0,
                            cause: format!("worker panicked: {}", e),
                        }))
                    });
                    if result.is_err() && !failed {
                        warn!("A translation failed, no further languages will be started");
                        failed = true;
                    }
                    progress.inc(1);
                    results.push((idx, result));
                }
                _ = shutdown.triggered() => {
                    // Outstanding workers are cancelled, not awaited
                    workers.abort_all();
                    let finished = results.len();
                    let remaining: Vec<&str> = languages
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !results.iter().any(|(done, _)| done == i))
                        .map(|(_, l)| l.as_str())
                        .collect();
                    return Err(interrupted(&remaining.join(","), finished, total - finished));
                }
            }
        }

        results.sort_by_key(|(idx, _)| *idx);
        let mut translated = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (_, result) in results {
            match result {
                Ok(path) => translated.push(path),
                Err(e) => {
                    error!("{}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(translated),
        }
    }
}

fn interrupted(language: &str, finished: usize, pending: usize) -> SubtitleError {
    SubtitleError::Interrupted {
        stage: Stage::Translation(language.to_string()),
        finished,
        pending,
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{spinner} translating [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Run the bounded retry loop for one language
async fn execute_task(
    backend: Arc<dyn TranslationBackend>,
    mut task: TranslationTask,
    source_language: String,
    attempt_timeout: Duration,
) -> Result<PathBuf> {
    info!("Translating to: {}", task.language);
    let language = task.language.clone();
    let failed = |attempts: u32, cause: String| SubtitleError::TranslationFailed {
        language: language.clone(),
        attempts,
        cause,
    };

    let content = fs::read_to_string(&task.source_path)
        .await
        .map_err(|e| failed(0, format!("cannot read {}: {}", task.source_path.display(), e)))?;
    let cues = parse_srt(&content).map_err(|e| failed(0, e.to_string()))?;
    let texts: Vec<String> = cues.iter().map(|c| c.text.clone()).collect();

    if let Some(dir) = task.destination_path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| failed(0, format!("cannot create {}: {}", dir.display(), e)))?;
    }

    let from = backend.language_code(&source_language, LanguageRole::Source);
    let to = backend.language_code(&task.language, LanguageRole::Target);
    let mut last_error = String::new();

    while task.attempt < task.max_attempts {
        task.attempt += 1;
        if task.attempt > 1 {
            warn!(
                "Retrying translation to {} (attempt {}/{})",
                task.language, task.attempt, task.max_attempts
            );
        }
        remove_stale(&task.destination_path).await;

        let outcome = match tokio::time::timeout(attempt_timeout, backend.translate(&texts, &from, &to)).await {
            Ok(Ok(translated)) => write_translation(&cues, translated, &task.destination_path).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Transient(format!(
                "attempt timed out after {}s",
                attempt_timeout.as_secs_f64()
            ))),
        };

        match outcome {
            Ok(()) if task.destination_path.exists() => {
                info!(
                    "Translated: {} -> {}",
                    task.source_path.display(),
                    task.destination_path.display()
                );
                return Ok(task.destination_path);
            }
            Ok(()) => {
                last_error = format!("file does not exist: {}", task.destination_path.display());
                warn!("Error during translation of {}: {}", task.language, last_error);
            }
            Err(BackendError::Fatal(message)) => {
                error!("Translation to {} cannot succeed: {}", task.language, message);
                last_error = message;
                break;
            }
            Err(BackendError::Transient(message)) => {
                warn!(
                    "Translation to {} failed on attempt {}: {}",
                    task.language, task.attempt, message
                );
                last_error = message;
            }
        }
    }

    remove_stale(&task.destination_path).await;
    Err(failed(task.attempt, last_error))
}

async fn write_translation(cues: &[SubtitleCue], translated: Vec<String>, destination: &Path) -> BackendResult<()> {
    if translated.len() != cues.len() {
        return Err(BackendError::Transient(format!(
            "backend returned {} text(s) for {} cue(s)",
            translated.len(),
            cues.len()
        )));
    }

    let mut output: Vec<SubtitleCue> = cues
        .iter()
        .zip(translated)
        .map(|(cue, text)| SubtitleCue {
            text,
            ..cue.clone()
        })
        .collect();
    wrap_cues(&mut output);

    fs::write(destination, format_srt(&output))
        .await
        .map_err(|e| BackendError::Transient(format!("cannot write {}: {}", destination.display(), e)))
}

async fn remove_stale(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!("Removed stale output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}
