//! Response audio assembly and playback
//!
//! - `container`: descriptor parsing and WAV framing of raw PCM
//! - `assembler`: per-turn chunk accumulation, completion and cancellation
//! - `sink`: playback device abstraction

pub mod assembler;
pub mod container;
pub mod sink;

pub use assembler::{PlaybackAssembler, ResponseTurn};
pub use container::{pcm_to_wav, wav_header, AudioDescriptor, WAV_HEADER_LEN};
pub use sink::{AssembledAudio, NullSink, PlaybackHandle, PlaybackSink};

#[cfg(feature = "audio-io")]
pub use sink::RodioSink;
