//! video-subtitles - GPU-aware subtitle transcription and translation
//!
//! Media files are transcribed by an external whisper front end, one job per
//! graphics card that has enough memory for the model. Transcripts are cached,
//! then fanned out to every requested language through a pluggable translation
//! backend and collected as `text_<stem>/<lang>.srt` (or `.vtt`).

pub mod assemble;
pub mod cache;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod gpu;
pub mod language;
pub mod scheduler;
pub mod shutdown;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
pub mod workflow;
