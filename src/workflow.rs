use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::assemble::{OutputArtifact, OutputAssembler};
use crate::cache::{CacheKey, TranscriptionCache};
use crate::config::Config;
use crate::convert::ConverterFactory;
use crate::error::{Result, SubtitleError};
use crate::gpu::{NvidiaSmiProbe, ResourcePool};
use crate::scheduler::{JobReport, JobRequest, JobScheduler};
use crate::shutdown::ShutdownSignal;
use crate::transcribe::{TRANSCRIPT_FILE, TranscriberFactory, TranscriptionBackend, TranscriptionRequest, transcript_dir_for};
use crate::translate::{TranslationBackend, TranslationPipeline, TranslatorFactory};

const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "mp3", "wav"];

/// A source file resolved for this run
struct SourceFile {
    path: PathBuf,
    key: CacheKey,
    transcript_dir: PathBuf,
}

impl SourceFile {
    /// `text_<stem>`, the directory the final subtitles end up in
    fn workdir(&self) -> &Path {
        self.transcript_dir.parent().unwrap_or(&self.transcript_dir)
    }
}

pub struct Workflow {
    config: Config,
    scheduler: JobScheduler,
    cache: TranscriptionCache,
    transcriber: Box<dyn TranscriptionBackend>,
    translator: Arc<dyn TranslationBackend>,
    assembler: OutputAssembler,
}

impl Workflow {
    /// Probe the cards, open the cache and check every external dependency
    pub async fn new(config: Config) -> Result<Self> {
        let pool = ResourcePool::from_probe(&NvidiaSmiProbe::new(&config.transcriber.gpu_probe_path))?;

        let transcriber = TranscriberFactory::create_default(&config.transcriber.binary_path);
        transcriber.check_availability()?;

        let translator = TranslatorFactory::create_backend(&config.translate)?;
        translator.check_availability().await?;

        let assembler = OutputAssembler::new(config.output.format, ConverterFactory::create_converter(&config.output));
        assembler.check_availability()?;

        let cache = TranscriptionCache::open(&config.cache.directory, config.cache.capacity)?;

        Ok(Self::with_components(config, pool, cache, transcriber, translator, assembler))
    }

    /// Assemble a workflow from already constructed parts
    pub fn with_components(
        config: Config,
        pool: ResourcePool,
        cache: TranscriptionCache,
        transcriber: Box<dyn TranscriptionBackend>,
        translator: Arc<dyn TranslationBackend>,
        assembler: OutputAssembler,
    ) -> Self {
        let scheduler = JobScheduler::new(pool, Duration::from_millis(config.scheduler.poll_interval_ms));
        Self {
            config,
            scheduler,
            cache,
            transcriber,
            translator,
            assembler,
        }
    }

    pub fn cache(&self) -> &TranscriptionCache {
        &self.cache
    }

    pub async fn process_file<P: AsRef<Path>>(
        &mut self,
        input: P,
        languages: &[String],
        shutdown: &mut ShutdownSignal,
    ) -> Result<Vec<OutputArtifact>> {
        self.process_files(&[input.as_ref().to_path_buf()], languages, shutdown)
            .await
    }

    /// Process every media file found below `input_dir` as one batch
    pub async fn process_directory<P: AsRef<Path>>(
        &mut self,
        input_dir: P,
        languages: &[String],
        shutdown: &mut ShutdownSignal,
    ) -> Result<Vec<OutputArtifact>> {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(SubtitleError::Config("Input path is not a directory".to_string()));
        }

        let mut media_files = Vec::new();
        for entry in WalkDir::new(input_dir).into_iter().filter_map(|e| e.ok()) {
            // Skip our own output directories
            let relative = entry.path().strip_prefix(input_dir).unwrap_or(entry.path());
            if relative.components().any(|c| c.as_os_str().to_string_lossy().starts_with("text_")) {
                continue;
            }
            if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
                if VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                    media_files.push(entry.path().to_path_buf());
                }
            }
        }

        info!("Found {} media files to process", media_files.len());
        self.process_files(&media_files, languages, shutdown).await
    }

    /// Transcribe, translate and assemble subtitles for `inputs`.
    ///
    /// Transcriptions missing from the cache are scheduled together so they
    /// spread over every available card. Files are then translated one after
    /// another.
    pub async fn process_files(
        &mut self,
        inputs: &[PathBuf],
        languages: &[String],
        shutdown: &mut ShutdownSignal,
    ) -> Result<Vec<OutputArtifact>> {
        let sources = self.resolve_sources(inputs)?;
        if sources.is_empty() {
            warn!("Nothing to process");
            return Ok(Vec::new());
        }

        self.transcribe(&sources, shutdown).await?;

        let pipeline = TranslationPipeline::new(
            self.translator.clone(),
            &self.config.translate,
            &self.config.transcriber.source_language,
        );

        let mut artifacts = Vec::new();
        for source in &sources {
            info!("Translating subtitles of {}", source.path.display());
            let transcript = source.transcript_dir.join(TRANSCRIPT_FILE);
            pipeline
                .run(&transcript, source.workdir(), languages, shutdown)
                .await?;
            artifacts.extend(self.assembler.assemble(source.workdir()).await?);
            info!("Done: {}", source.workdir().display());
        }
        Ok(artifacts)
    }

    /// Fingerprint every input, drop duplicates and refuse inputs whose
    /// subtitles would land in the same `text_<stem>` directory
    fn resolve_sources(&self, inputs: &[PathBuf]) -> Result<Vec<SourceFile>> {
        let model = self.config.transcriber.model;
        let source_language = &self.config.transcriber.source_language;
        let mut seen = HashSet::new();
        let mut workdirs: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut sources = Vec::with_capacity(inputs.len());

        for input in inputs {
            if !input.exists() {
                return Err(SubtitleError::FileNotFound(input.display().to_string()));
            }
            let path = std::path::absolute(input)?;
            let key = CacheKey::for_file(&path, model, source_language)?;
            if !seen.insert(key.clone()) {
                warn!("Skipping duplicate input {}", input.display());
                continue;
            }
            let transcript_dir = transcript_dir_for(&path, source_language)?;
            let workdir = transcript_dir.parent().unwrap_or(&transcript_dir).to_path_buf();
            if let Some(other) = workdirs.get(&workdir) {
                return Err(SubtitleError::Config(format!(
                    "{} and {} would both write subtitles to {}; rename one of them",
                    other.display(),
                    path.display(),
                    workdir.display()
                )));
            }
            workdirs.insert(workdir, path.clone());
            sources.push(SourceFile {
                path,
                key,
                transcript_dir,
            });
        }
        Ok(sources)
    }

    /// Make sure every source has its transcript on disk
    async fn transcribe(&mut self, sources: &[SourceFile], shutdown: &mut ShutdownSignal) -> Result<()> {
        let model = self.config.transcriber.model;
        let mut hits = Vec::new();
        let mut misses: Vec<&SourceFile> = Vec::new();
        let mut requests = Vec::new();

        for source in sources {
            if let Some(entry) = self.cache.get(&source.key)? {
                info!("Using cached transcription for {}", source.path.display());
                hits.push(entry);
                continue;
            }

            let request = TranscriptionRequest {
                source: source.path.clone(),
                model,
                language: self.config.transcriber.source_language.clone(),
                output_dir: source.transcript_dir.clone(),
            };
            requests.push(JobRequest::new(
                source.path.display().to_string(),
                model.required_memory_gb(),
                self.transcriber.job(&request),
            ));
            misses.push(source);
        }

        // Nothing touches the disk unless the whole batch can be placed
        self.scheduler.admission_check(&requests)?;
        for entry in &hits {
            TranscriptionCache::materialize(entry).await?;
        }
        if requests.is_empty() {
            return Ok(());
        }

        for source in &misses {
            fs::create_dir_all(&source.transcript_dir).await?;
            let stale = source.transcript_dir.join(TRANSCRIPT_FILE);
            if fs::try_exists(&stale).await? {
                fs::remove_file(&stale).await?;
            }
        }

        info!("Transcribing {} file(s) with model {}", requests.len(), model);
        match self.scheduler.run(requests, shutdown).await {
            Ok(report) => self.cache_transcripts(&misses, &report).await,
            Err(SubtitleError::JobBatchFailed { failed, report }) => {
                // Keep whatever did succeed for the next run
                self.cache_transcripts(&misses, &report).await?;
                Err(SubtitleError::JobBatchFailed { failed, report })
            }
            Err(e @ SubtitleError::Interrupted { .. }) => {
                let report = self.scheduler.last_report().to_vec();
                if let Err(cache_err) = self.cache_transcripts(&misses, &report).await {
                    warn!("Could not cache finished transcripts: {}", cache_err);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn cache_transcripts(&mut self, misses: &[&SourceFile], report: &[JobReport]) -> Result<()> {
        for job in report.iter().filter(|r| r.succeeded()) {
            let Some(source) = misses.get(job.id) else {
                continue;
            };
            let transcript = source.transcript_dir.join(TRANSCRIPT_FILE);
            let text = fs::read_to_string(&transcript).await.map_err(|e| {
                SubtitleError::Transcription(format!(
                    "{} exited successfully but {} is unreadable: {}",
                    job.label,
                    transcript.display(),
                    e
                ))
            })?;
            self.cache.put(source.key.clone(), source.transcript_dir.clone(), text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubtitleFormat;
    use crate::convert::NativeVttConverter;
    use crate::gpu::GraphicsCard;
    use crate::scheduler::{JobCommand, RunningJob};
    use crate::transcribe::WhisperModel;
    use crate::translate::{BackendResult, ExecutionPolicy, LanguageRole};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const TRANSCRIPT: &str = "1\n00:00:00,000 --> 00:00:02,000\nHello world\n\n";

    struct Exited;

    impl RunningJob for Exited {
        fn try_wait(&mut self) -> Result<Option<i32>> {
            Ok(Some(0))
        }

        fn kill(&mut self) {}
    }

    /// Never exits on its own
    struct Stuck;

    impl RunningJob for Stuck {
        fn try_wait(&mut self) -> Result<Option<i32>> {
            Ok(None)
        }

        fn kill(&mut self) {}
    }

    /// Writes the transcript as soon as it is spawned, unless the source
    /// file name starts with `slow`
    struct WriteTranscript {
        path: PathBuf,
        stuck: bool,
        spawns: Arc<AtomicUsize>,
    }

    impl JobCommand for WriteTranscript {
        fn spawn(&mut self, _card: &GraphicsCard) -> Result<Box<dyn RunningJob>> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            if self.stuck {
                return Ok(Box::new(Stuck));
            }
            std::fs::write(&self.path, TRANSCRIPT)?;
            Ok(Box::new(Exited))
        }

        fn describe(&self) -> String {
            format!("write {}", self.path.display())
        }
    }

    struct FakeTranscriber {
        spawns: Arc<AtomicUsize>,
    }

    impl TranscriptionBackend for FakeTranscriber {
        fn check_availability(&self) -> Result<()> {
            Ok(())
        }

        fn job(&self, request: &TranscriptionRequest) -> Box<dyn JobCommand> {
            let stuck = request
                .source
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("slow"));
            Box::new(WriteTranscript {
                path: request.transcript_path(),
                stuck,
                spawns: self.spawns.clone(),
            })
        }
    }

    struct Upper;

    #[async_trait]
    impl TranslationBackend for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn policy(&self) -> ExecutionPolicy {
            ExecutionPolicy::Sequential
        }

        fn language_code(&self, code: &str, _role: LanguageRole) -> String {
            code.to_string()
        }

        async fn translate(&self, texts: &[String], _from: &str, _to: &str) -> BackendResult<Vec<String>> {
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    fn workflow(root: &Path, card_gb: f64, spawns: Arc<AtomicUsize>) -> Workflow {
        let mut config = Config::default();
        config.transcriber.model = WhisperModel::Medium;
        config.scheduler.poll_interval_ms = 5;
        config.cache.directory = root.join("cache");

        let pool = ResourcePool::new(vec![GraphicsCard {
            id: 0,
            name: "Test Card".to_string(),
            memory_gb: card_gb,
        }])
        .unwrap();
        let cache = TranscriptionCache::open(&config.cache.directory, config.cache.capacity).unwrap();
        let assembler = OutputAssembler::new(SubtitleFormat::Srt, Box::new(NativeVttConverter));

        Workflow::with_components(
            config,
            pool,
            cache,
            Box::new(FakeTranscriber { spawns }),
            Arc::new(Upper),
            assembler,
        )
    }

    fn media_file(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[tokio::test]
    async fn test_second_run_uses_cached_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let video = media_file(dir.path(), "talk.mp4");
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 8.0, spawns.clone());
        let languages = vec!["en".to_string(), "es".to_string()];

        let first = assert_ok!(
            workflow
                .process_file(&video, &languages, &mut ShutdownSignal::never())
                .await
        );
        let workdir = dir.path().join("text_talk");
        assert_eq!(
            first.iter().map(|a| a.path.clone()).collect::<Vec<_>>(),
            vec![workdir.join("en.srt"), workdir.join("es.srt")]
        );
        assert!(std::fs::read_to_string(workdir.join("es.srt")).unwrap().contains("HELLO WORLD"));
        assert!(!workdir.join("en").exists());

        // The assembled layout removed en/out.srt; the cache restores it
        let second = assert_ok!(
            workflow
                .process_file(&video, &languages, &mut ShutdownSignal::never())
                .await
        );
        assert_eq!(second.len(), 2);
        assert_eq!(spawns.load(Ordering::SeqCst), 1);
        assert_eq!(workflow.cache().len(), 1);
        assert_eq!(std::fs::read_to_string(workdir.join("en.srt")).unwrap(), TRANSCRIPT);
    }

    #[tokio::test]
    async fn test_duplicate_inputs_transcribe_once() {
        let dir = tempfile::tempdir().unwrap();
        let video = media_file(dir.path(), "clip.mkv");
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 8.0, spawns.clone());

        let artifacts = assert_ok!(
            workflow
                .process_files(
                    &[video.clone(), video],
                    &["fr".to_string()],
                    &mut ShutdownSignal::never()
                )
                .await
        );
        assert_eq!(spawns.load(Ordering::SeqCst), 1);
        let languages: Vec<&str> = artifacts.iter().map(|a| a.language.as_str()).collect();
        assert_eq!(languages, vec!["en", "fr"]);
    }

    #[tokio::test]
    async fn test_model_too_large_for_cards() {
        let dir = tempfile::tempdir().unwrap();
        let video = media_file(dir.path(), "talk.mp4");
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 4.0, spawns.clone());

        let err = assert_err!(
            workflow
                .process_file(&video, &["es".to_string()], &mut ShutdownSignal::never())
                .await
        );
        assert!(matches!(err, SubtitleError::InsufficientResources { .. }));
        assert_eq!(spawns.load(Ordering::SeqCst), 0);
        assert!(workflow.cache().is_empty());
        assert!(!dir.path().join("text_talk").exists());
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut workflow = workflow(dir.path(), 8.0, Arc::new(AtomicUsize::new(0)));

        let result = workflow
            .process_file(dir.path().join("nope.mp4"), &["es".to_string()], &mut ShutdownSignal::never())
            .await;
        assert!(matches!(result, Err(SubtitleError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_batch_skips_outputs() {
        let dir = tempfile::tempdir().unwrap();
        media_file(dir.path(), "a.mp4");
        media_file(dir.path(), "b.webm");
        media_file(dir.path(), "notes.txt");
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 8.0, spawns.clone());

        let artifacts = assert_ok!(
            workflow
                .process_directory(dir.path(), &["de".to_string()], &mut ShutdownSignal::never())
                .await
        );
        assert_eq!(artifacts.len(), 4);
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("text_a").join("de.srt").exists());
        assert!(dir.path().join("text_b").join("de.srt").exists());
    }

    #[tokio::test]
    async fn test_same_stem_inputs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        media_file(dir.path(), "a.mp4");
        std::fs::write(dir.path().join("a.wav"), b"different audio").unwrap();
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 8.0, spawns.clone());

        let err = assert_err!(
            workflow
                .process_directory(dir.path(), &["de".to_string()], &mut ShutdownSignal::never())
                .await
        );
        match err {
            SubtitleError::Config(message) => {
                assert!(message.contains("a.mp4"), "{}", message);
                assert!(message.contains("a.wav"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(spawns.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("text_a").exists());
    }

    #[tokio::test]
    async fn test_source_language_change_transcribes_again() {
        let dir = tempfile::tempdir().unwrap();
        let video = media_file(dir.path(), "talk.mp4");
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 8.0, spawns.clone());
        let languages = vec!["fr".to_string()];

        assert_ok!(
            workflow
                .process_file(&video, &languages, &mut ShutdownSignal::never())
                .await
        );
        assert_eq!(spawns.load(Ordering::SeqCst), 1);

        workflow.config.transcriber.source_language = "es".to_string();
        let artifacts = assert_ok!(
            workflow
                .process_file(&video, &languages, &mut ShutdownSignal::never())
                .await
        );
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        assert_eq!(workflow.cache().len(), 2);
        let produced: Vec<&str> = artifacts.iter().map(|a| a.language.as_str()).collect();
        assert_eq!(produced, vec!["es", "fr"]);
    }

    #[tokio::test]
    async fn test_interrupt_keeps_finished_transcripts() {
        let dir = tempfile::tempdir().unwrap();
        let fast = media_file(dir.path(), "fast.mp4");
        let slow = media_file(dir.path(), "slow.mp4");
        let spawns = Arc::new(AtomicUsize::new(0));
        let mut workflow = workflow(dir.path(), 8.0, spawns.clone());
        let (handle, mut signal) = ShutdownSignal::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.trigger();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            workflow.process_files(&[fast.clone(), slow], &["de".to_string()], &mut signal),
        )
        .await
        .expect("interrupt was not honoured");
        assert!(matches!(
            result,
            Err(SubtitleError::Interrupted { stage: crate::error::Stage::Scheduling, .. })
        ));
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        assert_eq!(workflow.cache().len(), 1);

        // The finished transcript is not produced a second time
        assert_ok!(
            workflow
                .process_file(&fast, &["de".to_string()], &mut ShutdownSignal::never())
                .await
        );
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
    }
}
