use std::{io::Cursor, sync::Arc};

use av_traits::{AudioBuffer, CodecTag, Colormodel, EncodedPacket, MediaKind, SampleFormat, VideoFrame};
use avmux::{
    index::TrackIndex, AudioParams, Config, ContainerFormat, Error, MediaFile, TrackKind, TrackState, VideoParams,
};
use codecs::{plugin::DylibLoader, CodecLookup, Registry, RegistryConfig};

fn registry() -> Arc<dyn CodecLookup> {
    Arc::new(Registry::with_builtins(
        RegistryConfig {
            plugin_dir: None,
            cache_file: None,
            module_extension: "so".into(),
        },
        Box::new(DylibLoader),
    ))
}

fn create(format: ContainerFormat, config: Config) -> MediaFile<Cursor<Vec<u8>>> {
    MediaFile::create_with(Cursor::new(Vec::new()), format, config, registry()).unwrap()
}

fn open(buf: Vec<u8>) -> MediaFile<Cursor<Vec<u8>>> {
    MediaFile::open_with(Cursor::new(buf), Config::default(), registry()).unwrap()
}

/// Interleaved 16-bit samples whose value is their index, truncated.
fn pcm_samples(first_frame: u64, frames: u64, channels: u64) -> impl Iterator<Item = i16> {
    (first_frame * channels..(first_frame + frames) * channels).map(|s| s as i16)
}

fn video_packet(i: u64, pts: i64, keyframe: bool) -> EncodedPacket {
    EncodedPacket {
        data: vec![i as u8; 1000],
        pts,
        duration: 1001,
        samples: 1,
        keyframe,
    }
}

#[test]
fn test_quicktime_ntsc_round_trip() {
    let mut file = create(ContainerFormat::QuickTime, Config::default());
    let video = file
        .add_video_track(&VideoParams::new(720, 480, 30000, 1001, CodecTag::new(b"raw ")))
        .unwrap();
    let audio = file
        .add_audio_track(&AudioParams::new(2, 48000, 16, CodecTag::new(b"twos")))
        .unwrap();

    let mut audio_frames = 0;
    for i in 0..90u64 {
        // frames 10 and 11 are stored in decode order
        let pts = match i {
            10 => 11,
            11 => 10,
            i => i,
        } as i64
            * 1001;
        file.write_video_packet(video, &video_packet(i, pts, i % 30 == 0)).unwrap();

        let n = if i % 5 % 2 == 0 { 1602 } else { 1601 };
        let data = pcm_samples(audio_frames, n, 2).flat_map(|s| s.to_be_bytes()).collect();
        file.write_audio_packet(
            audio,
            &EncodedPacket {
                data,
                pts: 0,
                duration: n as u32,
                samples: n as u32,
                keyframe: true,
            },
        )
        .unwrap();
        audio_frames += n;
    }
    assert_eq!(144144, audio_frames);
    let buf = file.close().unwrap().into_inner();

    let mut file = open(buf);
    assert_eq!(ContainerFormat::QuickTime, file.format());
    assert_eq!((1, 1), (file.video_track_count(), file.audio_track_count()));

    assert_eq!(90, file.video_frame_count(0).unwrap());
    assert_eq!((720, 480), file.dimensions(0).unwrap());
    assert!((file.frame_rate(0).unwrap() - 29.97).abs() < 0.01);
    assert_eq!(CodecTag::new(b"raw "), file.video_compressor(0).unwrap());

    let video_track = file.tracks().iter().find(|t| t.kind == TrackKind::Video).unwrap();
    match &video_track.index {
        TrackIndex::Qt(index) => assert!(index.tables().composition_offset.is_some()),
        index => panic!("unexpected index {:?}", index),
    }
    assert_eq!(Some(11 * 1001), file.frame_time(0, 10).unwrap());
    assert_eq!(Some(10 * 1001), file.frame_time(0, 11).unwrap());
    assert_eq!(Some(12 * 1001), file.frame_time(0, 12).unwrap());
    assert_eq!(Some(1001), file.frame_duration(0, 12).unwrap());

    assert!(file.is_keyframe(0, 30).unwrap());
    assert!(!file.is_keyframe(0, 31).unwrap());
    assert_eq!(Some(30), file.keyframe_before(0, 45).unwrap());
    assert_eq!(Some(60), file.keyframe_after(0, 45).unwrap());
    assert_eq!(None, file.keyframe_after(0, 61).unwrap());

    file.set_video_position(0, 45).unwrap();
    assert_eq!(TrackState::Positioned, file.track_state(MediaKind::Video, 0).unwrap());
    let packet = file.read_video_packet(0).unwrap().unwrap();
    assert_eq!(vec![45; 1000], packet.data);
    assert_eq!(45 * 1001, packet.pts);
    assert_eq!(46, file.video_position(0).unwrap());

    assert_eq!(40, file.seek_video_time(0, 40 * 1001 + 500).unwrap());
    assert_eq!(vec![40; 1000], file.read_video_packet(0).unwrap().unwrap().data);

    assert_eq!(2, file.channels(0).unwrap());
    assert_eq!(48000, file.sample_rate(0).unwrap());
    assert_eq!(16, file.bits(0).unwrap());
    assert_eq!(144144, file.audio_sample_count(0).unwrap());
    assert_eq!(CodecTag::new(b"twos"), file.audio_compressor(0).unwrap());

    let packet = file.read_audio_packet(0).unwrap().unwrap();
    assert_eq!(1602, packet.samples);
    assert_eq!(1602 * 4, packet.data.len());

    file.set_audio_position(0, 1602 + 1601 + 10).unwrap();
    let mut decoded = AudioBuffer::new(SampleFormat::S16, 2);
    assert_eq!(4, file.decode_audio(0, 4, &mut decoded).unwrap());
    assert_eq!(AudioBuffer::from_s16(2, pcm_samples(3213, 4, 2).collect()), decoded);
    assert_eq!(3217, file.audio_position(0).unwrap());
    assert_eq!(TrackState::Decoding, file.track_state(MediaKind::Audio, 0).unwrap());

    file.set_audio_position(0, 144140).unwrap();
    let mut decoded = AudioBuffer::new(SampleFormat::S16, 2);
    assert_eq!(4, file.decode_audio(0, 100, &mut decoded).unwrap());
    assert_eq!(AudioBuffer::from_s16(2, pcm_samples(144140, 4, 2).collect()), decoded);
}

#[test]
fn test_mp4_encode_decode() {
    let mut file = create(ContainerFormat::Mp4, Config::default());
    let video = file.add_video_track(&VideoParams::new(4, 2, 25, 1, CodecTag::new(b"raw "))).unwrap();
    assert_eq!(
        "raw_rgb24",
        file.codec_info(MediaKind::Video, video).unwrap().unwrap().name
    );

    for i in 0..5 {
        let mut frame = VideoFrame::new(Colormodel::Rgb888, 4, 2);
        frame.plane_mut(0).fill(i as u8 * 10);
        frame.timestamp = i;
        file.encode_video(video, &frame).unwrap();
    }
    let buf = file.close().unwrap().into_inner();

    let mut file = open(buf);
    assert_eq!(ContainerFormat::Mp4, file.format());
    assert_eq!(5, file.video_frame_count(0).unwrap());
    let mut frame = VideoFrame::new(Colormodel::Rgb888, 4, 2);
    for i in 0..5 {
        assert!(file.decode_video(0, &mut frame).unwrap());
        assert!(frame.plane(0).iter().all(|&b| b == i * 10));
        assert_eq!(i as i64, frame.timestamp);
    }
    assert!(!file.decode_video(0, &mut frame).unwrap());
    assert_eq!(TrackState::Eof, file.track_state(MediaKind::Video, 0).unwrap());

    // the raw codec only works in RGB and nothing converts to YUV
    file.set_video_position(0, 0).unwrap();
    let mut yuv = VideoFrame::new(Colormodel::Yuv420p, 4, 2);
    assert!(matches!(
        file.decode_video(0, &mut yuv),
        Err(Error::UnsupportedColormodel { .. })
    ));
    assert_eq!(0, file.video_position(0).unwrap());

    // retrying in a supported colormodel still gets the first frame
    assert!(file.decode_video(0, &mut frame).unwrap());
    assert!(frame.plane(0).iter().all(|&b| b == 0));
    assert_eq!(1, file.video_position(0).unwrap());
}

#[test]
fn test_late_start_round_trip() {
    let mut file = create(ContainerFormat::QuickTime, Config::default());
    let video = file
        .add_video_track(&VideoParams::new(16, 16, 30000, 1001, CodecTag::new(b"raw ")))
        .unwrap();
    let pts = [1001, 3003, 2002, 4004, 5005];
    for (i, &t) in pts.iter().enumerate() {
        file.write_video_packet(video, &video_packet(i as u64, t, i == 0)).unwrap();
    }
    let buf = file.close().unwrap().into_inner();
    assert!(buf.windows(4).any(|w| w == b"elst"));

    let mut file = open(buf);
    assert_eq!(1001, file.tracks()[0].media_start);
    for (i, &t) in pts.iter().enumerate() {
        assert_eq!(Some(t), file.frame_time(0, i as u64).unwrap());
    }
    assert_eq!(0, file.seek_video_time(0, 1001).unwrap());
    assert_eq!(2, file.seek_video_time(0, 3003 + 10).unwrap());
    let packet = file.read_video_packet(0).unwrap().unwrap();
    assert_eq!(vec![2; 1000], packet.data);
    assert_eq!(2002, packet.pts);
}

#[test]
fn test_oversized_sample_size() {
    let mut file = create(ContainerFormat::QuickTime, Config::default());
    let video = file
        .add_video_track(&VideoParams::new(16, 16, 30000, 1001, CodecTag::new(b"raw ")))
        .unwrap();
    for i in 0..4 {
        file.write_video_packet(video, &video_packet(i, i as i64 * 1001, true)).unwrap();
    }
    let mut buf = file.close().unwrap().into_inner();

    // every sample is 1000 bytes, so the sample size table holds one constant size
    let stsz = buf.windows(4).position(|w| w == b"stsz").unwrap();
    assert_eq!(1000u32.to_be_bytes(), buf[stsz + 8..stsz + 12]);
    buf[stsz + 8..stsz + 12].copy_from_slice(&0xFFFF_FFF0u32.to_be_bytes());

    let mut file = open(buf);
    assert_eq!(4, file.video_frame_count(0).unwrap());
    assert!(matches!(
        file.read_video_packet(0),
        Err(Error::MalformedIndex { track: 0, .. })
    ));
    assert_eq!(0, file.video_position(0).unwrap());
}

#[test]
fn test_avi_round_trip() {
    let stream = tempfile::tempfile().unwrap();
    let mut file = MediaFile::create_with(stream, ContainerFormat::Avi, Config::default(), registry()).unwrap();
    let video = file.add_video_track(&VideoParams::new(4, 2, 25, 1, CodecTag::new(b"raw "))).unwrap();
    let audio = file
        .add_audio_track(&AudioParams::new(2, 44100, 16, CodecTag::new(b"sowt")))
        .unwrap();

    for i in 0..25u64 {
        let mut frame = VideoFrame::new(Colormodel::Rgb888, 4, 2);
        frame.plane_mut(0).fill(i as u8);
        frame.timestamp = i as i64;
        file.encode_video(video, &frame).unwrap();
        file.encode_audio(audio, &AudioBuffer::from_s16(2, pcm_samples(i * 1764, 1764, 2).collect()))
            .unwrap();
    }
    file.insert_keyframe(video, 12).unwrap();
    let stream = file.close().unwrap();

    let mut file = MediaFile::open_with(stream, Config::default(), registry()).unwrap();
    assert_eq!(ContainerFormat::Avi, file.format());
    assert_eq!(25, file.video_frame_count(0).unwrap());
    assert_eq!(25.0, file.frame_rate(0).unwrap());
    assert_eq!(25 * 1764, file.audio_sample_count(0).unwrap());
    assert_eq!(
        "pcm_s16le",
        file.codec_info(MediaKind::Audio, 0).unwrap().unwrap().name
    );

    assert!(file.is_keyframe(0, 12).unwrap());
    file.set_video_position(0, 12).unwrap();
    let mut frame = VideoFrame::new(Colormodel::Rgb888, 4, 2);
    assert!(file.decode_video(0, &mut frame).unwrap());
    assert!(frame.plane(0).iter().all(|&b| b == 12));

    file.set_audio_position(0, 1764 * 10 + 5).unwrap();
    let mut decoded = AudioBuffer::new(SampleFormat::S16, 2);
    assert_eq!(3, file.decode_audio(0, 3, &mut decoded).unwrap());
    assert_eq!(AudioBuffer::from_s16(2, pcm_samples(1764 * 10 + 5, 3, 2).collect()), decoded);
}

#[test]
fn test_avi_segments() {
    let mut file = create(
        ContainerFormat::Avi,
        Config {
            riff_segment_size: 64 << 10,
            ..Config::default()
        },
    );
    let video = file.add_video_track(&VideoParams::new(720, 480, 25, 1, CodecTag::new(b"MJPG"))).unwrap();
    for i in 0..100 {
        file.write_video_packet(
            video,
            &EncodedPacket {
                data: vec![i as u8; 5000],
                keyframe: i % 10 == 0,
                ..Default::default()
            },
        )
        .unwrap();
    }
    let buf = file.close().unwrap().into_inner();
    assert!(buf.windows(4).filter(|w| *w == b"AVIX").count() >= 5);

    let mut file = open(buf);
    assert_eq!(100, file.video_frame_count(0).unwrap());
    assert_eq!(Some(90), file.keyframe_before(0, 99).unwrap());
    file.set_video_position(0, 99).unwrap();
    let packet = file.read_video_packet(0).unwrap().unwrap();
    assert_eq!(vec![99; 5000], packet.data);
    assert!(file.read_video_packet(0).unwrap().is_none());
}

#[test]
fn test_timecodes() {
    let mut file = create(ContainerFormat::QuickTime, Config::default());
    let video = file
        .add_video_track(&VideoParams::new(16, 16, 30000, 1001, CodecTag::new(b"raw ")))
        .unwrap();
    for i in 0..60 {
        file.write_video_packet(video, &video_packet(i, i as i64 * 1001, true)).unwrap();
    }
    // 00:00:10:00 at frame 0, then a jump to 01:00:00:00 at frame 30
    file.set_timecode(video, 0, 300).unwrap();
    file.set_timecode(video, 1, 301).unwrap();
    file.set_timecode(video, 30, 107892).unwrap();
    assert_eq!(None, file.timecode_at(video, 0).unwrap());
    let buf = file.close().unwrap().into_inner();

    let file = open(buf);
    assert!(file.tracks().iter().any(|t| t.kind == TrackKind::Timecode));
    assert_eq!(1, file.video_track_count());
    assert_eq!("00:00:10:00", file.timecode_at(0, 0).unwrap().unwrap().to_string());
    assert_eq!("00:00:10:29", file.timecode_at(0, 29).unwrap().unwrap().to_string());
    assert_eq!("01:00:00:00", file.timecode_at(0, 30).unwrap().unwrap().to_string());
    assert_eq!("01:00:00:05", file.timecode_at(0, 35).unwrap().unwrap().to_string());
}
