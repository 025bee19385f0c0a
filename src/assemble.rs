use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::SubtitleFormat;
use crate::convert::SubtitleConverter;
use crate::error::{Result, SubtitleError};

/// A final subtitle file, one per language
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub language: String,
    pub path: PathBuf,
    pub format: SubtitleFormat,
}

/// Flattens `<workdir>/<lang>/*.srt` into `<workdir>/<lang>.<ext>`
pub struct OutputAssembler {
    format: SubtitleFormat,
    converter: Box<dyn SubtitleConverter>,
}

impl OutputAssembler {
    pub fn new(format: SubtitleFormat, converter: Box<dyn SubtitleConverter>) -> Self {
        Self { format, converter }
    }

    pub fn check_availability(&self) -> Result<()> {
        if self.format == SubtitleFormat::WebVtt {
            self.converter.check_availability()?;
        }
        Ok(())
    }

    /// Move every per-language transcript to the top of `workdir`.
    ///
    /// Language directories are removed once their file has moved, so a
    /// second call on the same workdir finds nothing and returns no artifacts.
    pub async fn assemble(&self, workdir: &Path) -> Result<Vec<OutputArtifact>> {
        let sources = find_srt_files(workdir)?;
        let mut artifacts = Vec::with_capacity(sources.len());

        for source in sources {
            let language_dir = source
                .parent()
                .ok_or_else(|| SubtitleError::Assembly(format!("no parent for {}", source.display())))?
                .to_path_buf();
            let language = language_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| SubtitleError::Assembly(format!("no language for {}", source.display())))?;

            let srt_path = workdir.join(format!("{}.srt", language));
            replace_file(&source, &srt_path).await?;
            fs::remove_dir_all(&language_dir).await.map_err(|e| {
                SubtitleError::Assembly(format!("cannot remove {}: {}", language_dir.display(), e))
            })?;

            let path = match self.format {
                SubtitleFormat::Srt => srt_path,
                SubtitleFormat::WebVtt => self.convert(&srt_path).await?,
            };
            info!("Wrote {}", relative_to(&path, workdir));

            artifacts.push(OutputArtifact {
                language,
                path,
                format: self.format,
            });
        }

        artifacts.sort_by(|a, b| a.language.cmp(&b.language));
        Ok(artifacts)
    }

    async fn convert(&self, srt_path: &Path) -> Result<PathBuf> {
        let target = srt_path.with_extension(self.format.extension());
        remove_if_exists(&target).await?;
        self.converter.convert(srt_path, &target).await?;
        fs::remove_file(srt_path)
            .await
            .map_err(|e| SubtitleError::Assembly(format!("cannot remove {}: {}", srt_path.display(), e)))?;
        Ok(target)
    }
}

/// `.srt` files inside the language directories of `workdir`
fn find_srt_files(workdir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(workdir).min_depth(2).max_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|e| SubtitleError::Assembly(format!("cannot scan {}: {}", workdir.display(), e)))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "srt") {
            debug!("Found transcript {}", path.display());
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

async fn replace_file(from: &Path, to: &Path) -> Result<()> {
    remove_if_exists(to).await?;
    fs::rename(from, to)
        .await
        .map_err(|e| SubtitleError::Assembly(format!("cannot move {} to {}: {}", from.display(), to.display(), e)))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SubtitleError::Assembly(format!("cannot remove {}: {}", path.display(), e))),
    }
}

fn relative_to(path: &Path, base: &Path) -> String {
    let base = base.parent().unwrap_or(base);
    pathdiff::diff_paths(path, base)
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::NativeVttConverter;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    const CUE: &str = "1\n00:00:00,000 --> 00:00:01,000\nHi\n\n";

    fn workdir_with(languages: &[&str]) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        for language in languages {
            temp.child(format!("text_video/{}/out.srt", language)).write_str(CUE).unwrap();
        }
        let workdir = temp.path().join("text_video");
        (temp, workdir)
    }

    #[tokio::test]
    async fn test_assembles_srt_per_language() {
        let (temp, workdir) = workdir_with(&["es", "fr"]);
        // A stale result from an earlier run is replaced
        temp.child("text_video/es.srt").write_str("stale").unwrap();

        let assembler = OutputAssembler::new(SubtitleFormat::Srt, Box::new(NativeVttConverter));
        let artifacts = assembler.assemble(&workdir).await.unwrap();

        let languages: Vec<&str> = artifacts.iter().map(|a| a.language.as_str()).collect();
        assert_eq!(languages, vec!["es", "fr"]);
        temp.child("text_video/es.srt").assert(CUE);
        temp.child("text_video/fr.srt").assert(predicate::path::exists());
        temp.child("text_video/es").assert(predicate::path::missing());
        temp.child("text_video/fr").assert(predicate::path::missing());

        assert!(assembler.assemble(&workdir).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assembles_webvtt() {
        let (temp, workdir) = workdir_with(&["de"]);

        let assembler = OutputAssembler::new(SubtitleFormat::WebVtt, Box::new(NativeVttConverter));
        let artifacts = assembler.assemble(&workdir).await.unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, workdir.join("de.vtt"));
        temp.child("text_video/de.vtt").assert(predicate::str::starts_with("WEBVTT"));
        temp.child("text_video/de.srt").assert(predicate::path::missing());
    }
}
