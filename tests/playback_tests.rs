// Integration tests for response assembly
//
// Synthesized containers are checked with an independent WAV reader.

mod common;

use std::io::Cursor;

use common::RecordingSink;
use duplex_voice::playback::{pcm_to_wav, AudioDescriptor, PlaybackAssembler, WAV_HEADER_LEN};
use duplex_voice::transport::{InboundEvent, LiveWire, WireFormat, WireFrame};

#[test]
fn test_synthesized_container_parses() {
    let pcm: Vec<u8> = [1000i16, -1000, 0, 32767]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let descriptor = AudioDescriptor::parse("audio/L16;rate=24000");

    let wav = match descriptor {
        AudioDescriptor::RawPcm { sample_rate, bits_per_sample } => pcm_to_wav(&pcm, sample_rate, bits_per_sample).unwrap(),
        other => panic!("expected raw PCM, got {:?}", other),
    };
    assert_eq!(wav.len(), WAV_HEADER_LEN + pcm.len());

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 24000);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);

    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, vec![1000, -1000, 0, 32767]);
}

#[test]
fn test_descriptor_parameters() {
    assert_eq!(
        AudioDescriptor::parse("audio/pcm; RATE=16000"),
        AudioDescriptor::RawPcm { sample_rate: 16000, bits_per_sample: 16 }
    );
    assert_eq!(
        AudioDescriptor::parse("audio/L8"),
        AudioDescriptor::RawPcm { sample_rate: 24000, bits_per_sample: 8 }
    );
    assert!(!AudioDescriptor::parse("audio/mpeg").is_raw_pcm());
}

#[test]
fn test_assembled_turn_is_valid_wav() {
    let sink = RecordingSink::default();
    let mut assembler = PlaybackAssembler::new(Box::new(sink.clone()), "audio/L16;rate=16000");

    assembler.begin_turn();
    for chunk in [vec![0x10, 0x00], vec![0x20, 0x00, 0x30], vec![0x00]] {
        assert!(assembler.push_chunk(chunk, None));
    }
    assembler.complete().unwrap();

    let played = sink.played.lock().unwrap();
    let reader = hound::WavReader::new(Cursor::new(played[0].bytes.clone())).unwrap();
    assert_eq!(reader.spec().sample_rate, 16000);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, vec![0x10, 0x20, 0x30]);
}

#[test]
fn test_container_audio_passes_through() {
    let sink = RecordingSink::default();
    let mut assembler = PlaybackAssembler::new(Box::new(sink.clone()), "audio/L16;rate=24000");

    let wav = pcm_to_wav(&[0, 0, 1, 0], 8000, 16).unwrap();
    assembler.begin_turn();
    assembler.push_chunk(wav[..20].to_vec(), None);
    assembler.push_chunk(wav[20..].to_vec(), None);
    assembler.complete().unwrap();

    // Already a RIFF file: no second header
    assert_eq!(sink.played.lock().unwrap()[0].bytes, wav);
}

#[test]
fn test_remote_rate_out_of_range_plays_at_default() {
    let frame = WireFrame::Text(
        r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=3000000000","data":"AAAAAA=="}}]}}}"#
            .to_string(),
    );
    let events = LiveWire::new().decode(&frame).unwrap();

    let sink = RecordingSink::default();
    let mut assembler = PlaybackAssembler::new(Box::new(sink.clone()), "audio/L16;rate=24000");
    assembler.begin_turn();
    for event in events {
        if let InboundEvent::AudioChunk { data, descriptor } = event {
            assembler.push_chunk(data, descriptor);
        }
    }
    let audio = assembler.complete().unwrap().unwrap();

    let reader = hound::WavReader::new(Cursor::new(audio.bytes)).unwrap();
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.len(), 2);
    assert_eq!(sink.played.lock().unwrap().len(), 1);
}
