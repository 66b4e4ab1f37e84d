//! Energy-threshold voice activity detection
//!
//! The detector is driven purely by frame timestamps: an utterance opens on
//! the first frame at or above the threshold and closes once the gap since the
//! last loud frame reaches the hangover duration. It owns no timers or threads.

use std::time::Duration;

use tracing::debug;

use super::backend::AudioFrame;

/// Detector parameters
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Energy at or above which a frame counts as speech
    pub sound_threshold: f32,
    /// Quiet time required before an utterance is closed
    pub hangover: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sound_threshold: 2.5,
            hangover: Duration::from_millis(800),
        }
    }
}

/// Utterance boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    Start { timestamp_ms: u64 },
    /// `end_ms` is the timestamp of the last frame at or above the threshold
    End { start_ms: u64, end_ms: u64 },
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    utterance_start_ms: Option<u64>,
    last_active_ms: u64,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            utterance_start_ms: None,
            last_active_ms: 0,
        }
    }

    /// Feed one frame; returns a boundary event if this frame crosses one
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let now = frame.timestamp_ms;

        if frame.energy >= self.config.sound_threshold {
            self.last_active_ms = now;
            if self.utterance_start_ms.is_none() {
                self.utterance_start_ms = Some(now);
                debug!("Speech started at {}ms (energy {:.2})", now, frame.energy);
                return Some(VadEvent::Start { timestamp_ms: now });
            }
            return None;
        }

        let start_ms = self.utterance_start_ms?;
        let quiet_ms = now.saturating_sub(self.last_active_ms);
        if quiet_ms >= self.config.hangover.as_millis() as u64 {
            self.utterance_start_ms = None;
            debug!("Speech ended at {}ms after {}ms of silence", self.last_active_ms, quiet_ms);
            return Some(VadEvent::End {
                start_ms,
                end_ms: self.last_active_ms,
            });
        }

        None
    }

    /// Whether an utterance is currently open
    pub fn is_active(&self) -> bool {
        self.utterance_start_ms.is_some()
    }

    /// Forget any open utterance
    pub fn reset(&mut self) {
        self.utterance_start_ms = None;
        self.last_active_ms = 0;
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Lazily map a frame sequence to `(frame_index, event)` pairs
    pub fn events<'a, I>(&'a mut self, frames: I) -> VadEvents<'a, I::IntoIter>
    where
        I: IntoIterator<Item = &'a AudioFrame>,
    {
        VadEvents {
            detector: self,
            frames: frames.into_iter().enumerate(),
        }
    }
}

pub struct VadEvents<'a, I> {
    detector: &'a mut VoiceActivityDetector,
    frames: std::iter::Enumerate<I>,
}

impl<'a, I> Iterator for VadEvents<'a, I>
where
    I: Iterator<Item = &'a AudioFrame>,
{
    type Item = (usize, VadEvent);

    fn next(&mut self) -> Option<Self::Item> {
        for (index, frame) in self.frames.by_ref() {
            if let Some(event) = self.detector.process(frame) {
                return Some((index, event));
            }
        }
        None
    }
}

/// A bounded run of speech frames
#[derive(Debug, Clone)]
pub struct Utterance {
    pub frames: Vec<AudioFrame>,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Utterance {
    /// All samples as 16-bit little-endian bytes, in capture order
    pub fn pcm_bytes(&self) -> Vec<u8> {
        self.frames.iter().flat_map(|f| f.pcm_bytes()).collect()
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(|f| f.samples.len()).sum()
    }
}

/// Collects the frames of the open utterance
#[derive(Debug, Default)]
pub struct UtteranceBuilder {
    frames: Vec<AudioFrame>,
}

impl UtteranceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Close the utterance, trimming frames captured after the last loud one
    pub fn finish(&mut self, start_ms: u64, end_ms: u64) -> Utterance {
        let mut frames = std::mem::take(&mut self.frames);
        frames.retain(|f| f.timestamp_ms >= start_ms && f.timestamp_ms <= end_ms);
        Utterance {
            frames,
            start_ms,
            end_ms,
        }
    }

    /// Drop everything buffered so far
    pub fn discard(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_energy(index: u64, energy: f32) -> AudioFrame {
        AudioFrame {
            samples: vec![0; 160],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: index * 10,
            energy,
        }
    }

    fn detector(hangover_ms: u64) -> VoiceActivityDetector {
        VoiceActivityDetector::new(VadConfig {
            sound_threshold: 2.5,
            hangover: Duration::from_millis(hangover_ms),
        })
    }

    #[test]
    fn test_reference_scenario() {
        let energies = [0.1, 0.1, 3.0, 4.0, 3.5, 0.2, 0.2, 0.2];
        let frames: Vec<AudioFrame> = energies
            .iter()
            .enumerate()
            .map(|(i, &e)| frame_with_energy(i as u64, e))
            .collect();

        // Hangover of three 10ms frame periods
        let mut vad = detector(30);
        let events: Vec<_> = vad.events(&frames).collect();

        assert_eq!(
            events,
            vec![
                (2, VadEvent::Start { timestamp_ms: 20 }),
                (7, VadEvent::End { start_ms: 20, end_ms: 40 }),
            ]
        );

        let mut builder = UtteranceBuilder::new();
        for frame in &frames[2..=7] {
            builder.push(frame.clone());
        }
        let utterance = builder.finish(20, 40);
        let stamps: Vec<u64> = utterance.frames.iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps, vec![20, 30, 40]);
    }

    #[test]
    fn test_short_dip_does_not_split_utterance() {
        let energies = [3.0, 0.1, 3.0, 0.1, 0.1, 0.1, 0.1];
        let frames: Vec<AudioFrame> = energies
            .iter()
            .enumerate()
            .map(|(i, &e)| frame_with_energy(i as u64, e))
            .collect();

        let mut vad = detector(30);
        let events: Vec<_> = vad.events(&frames).map(|(_, e)| e).collect();

        assert_eq!(
            events,
            vec![
                VadEvent::Start { timestamp_ms: 0 },
                VadEvent::End { start_ms: 0, end_ms: 20 },
            ]
        );
    }

    #[test]
    fn test_silence_emits_nothing() {
        let frames: Vec<AudioFrame> = (0..50).map(|i| frame_with_energy(i, 0.5)).collect();
        let mut vad = detector(30);
        assert_eq!(vad.events(&frames).count(), 0);
        assert!(!vad.is_active());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut vad = detector(30);
        let event = vad.process(&frame_with_energy(0, 2.5));
        assert_eq!(event, Some(VadEvent::Start { timestamp_ms: 0 }));
    }

    #[test]
    fn test_start_end_pairs_for_any_run() {
        // Several speech bursts separated by long silences
        for burst_len in 1..6u64 {
            let mut energies = Vec::new();
            for _ in 0..3 {
                energies.extend(std::iter::repeat(5.0).take(burst_len as usize));
                energies.extend(std::iter::repeat(0.0).take(5));
            }
            let frames: Vec<AudioFrame> = energies
                .iter()
                .enumerate()
                .map(|(i, &e)| frame_with_energy(i as u64, e))
                .collect();

            let mut vad = detector(30);
            let events: Vec<VadEvent> = vad.events(&frames).map(|(_, e)| e).collect();

            assert_eq!(events.len(), 6);
            for pair in events.chunks(2) {
                assert!(matches!(pair[0], VadEvent::Start { .. }));
                assert!(matches!(pair[1], VadEvent::End { .. }));
            }
        }
    }

    #[test]
    fn test_reset_makes_detector_reusable() {
        let mut vad = detector(30);
        vad.process(&frame_with_energy(0, 4.0));
        assert!(vad.is_active());

        vad.reset();
        assert!(!vad.is_active());
        assert_eq!(
            vad.process(&frame_with_energy(1, 4.0)),
            Some(VadEvent::Start { timestamp_ms: 10 })
        );
    }

    #[test]
    fn test_utterance_pcm_in_capture_order() {
        let mut builder = UtteranceBuilder::new();
        builder.push(AudioFrame::new(vec![1, 2], 16000, 0));
        builder.push(AudioFrame::new(vec![3], 16000, 1));
        let utterance = builder.finish(0, 1);

        assert_eq!(utterance.sample_count(), 3);
        assert_eq!(utterance.pcm_bytes(), vec![1, 0, 2, 0, 3, 0]);
        assert!(builder.is_empty());
    }
}
