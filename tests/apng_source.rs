use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use alphamux::{
    AnimatedImageSource, ApngDecoder, Completion, ExportConfig, FrameSource, FrameTiming,
    InMemorySink, MediaTime, MuxError, SessionController, Size, SourceSpec, open_source,
};

/// Write an RGBA APNG where frame `i` is filled with `frames[i].0` and shown for
/// `frames[i].1 / frames[i].2` seconds.
fn write_apng(path: &Path, size: Size, frames: &[([u8; 4], u16, u16)]) {
    let file = File::create(path).unwrap();
    let mut enc = png::Encoder::new(BufWriter::new(file), size.width, size.height);
    enc.set_color(png::ColorType::Rgba);
    enc.set_depth(png::BitDepth::Eight);
    enc.set_animated(frames.len() as u32, 0).unwrap();
    let mut writer = enc.write_header().unwrap();
    for (rgba, num, den) in frames {
        writer.set_frame_delay(*num, *den).unwrap();
        writer.write_image_data(&rgba.repeat(size.pixel_count())).unwrap();
    }
    writer.finish().unwrap();
}

fn three_frame_fixture(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("anim.png");
    write_apng(
        &path,
        Size::new(3, 2),
        &[
            ([255, 0, 0, 255], 1, 10),
            ([0, 255, 0, 128], 2, 10),
            ([0, 0, 255, 0], 15, 100),
        ],
    );
    path
}

#[test]
fn source_yields_each_frame_with_its_declared_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = three_frame_fixture(dir.path());

    let decoder = ApngDecoder::open(&path).unwrap();
    let mut source = AnimatedImageSource::new(Box::new(decoder)).unwrap();
    assert_eq!(source.output_size(), Size::new(3, 2));
    assert_eq!(source.start_time(), MediaTime::ZERO);
    assert_eq!(source.frame_count(), 3);

    let mut seen = Vec::new();
    while source.has_next() {
        let frame = source.next_frame().unwrap().unwrap();
        let FrameTiming::Duration(d) = frame.timing else {
            panic!("animated image frames carry durations");
        };
        seen.push((frame.buffer.rgba_at(2, 1).unwrap(), d));
    }
    assert_eq!(
        seen,
        vec![
            ([255, 0, 0, 255], MediaTime::new(1, 10)),
            ([0, 255, 0, 128], MediaTime::new(2, 10)),
            ([0, 0, 255, 0], MediaTime::new(15, 100)),
        ]
    );
    assert!(source.next_frame().unwrap().is_none());
}

#[test]
fn cancelled_source_stops_producing() {
    let dir = tempfile::tempdir().unwrap();
    let path = three_frame_fixture(dir.path());
    let mut source = open_source(&SourceSpec::AnimatedImage { path }, &ExportConfig::default()).unwrap();
    assert!(source.next_frame().unwrap().is_some());
    source.cancel();
    source.cancel();
    assert!(!source.has_next());
    assert!(source.next_frame().unwrap().is_none());
}

#[test]
fn apng_session_places_frames_at_running_sums() {
    let dir = tempfile::tempdir().unwrap();
    let path = three_frame_fixture(dir.path());
    let out = dir.path().join("out").join("anim.mov");

    let source = open_source(&SourceSpec::AnimatedImage { path }, &ExportConfig::default()).unwrap();
    let sink = InMemorySink::new(&out);
    let record = sink.record();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let fail_tx = tx.clone();
    let done = Completion::new(
        move || tx.send(true).unwrap(),
        move |_| fail_tx.send(false).unwrap(),
    );

    SessionController::with_parts(source, Box::new(sink), &ExportConfig::default(), done)
        .unwrap()
        .run()
        .unwrap();

    assert!(rx.recv().unwrap());
    assert_eq!(
        record.timestamps(),
        vec![MediaTime::ZERO, MediaTime::new(1, 10), MediaTime::new(3, 10)]
    );
    assert_eq!(record.session_end(), Some(MediaTime::new(45, 100)));
    let pixels: Vec<_> = record.frames().iter().map(|f| f.first_pixel).collect();
    assert_eq!(
        pixels,
        vec![Some([255, 0, 0, 255]), Some([0, 255, 0, 128]), Some([0, 0, 255, 0])]
    );
    assert!(out.exists());
}

#[test]
fn zero_delay_frame_fails_the_session_with_an_append_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zero.png");
    write_apng(
        &path,
        Size::new(2, 2),
        &[([255, 0, 0, 255], 0, 10), ([0, 0, 255, 255], 1, 10)],
    );
    let out = dir.path().join("zero.mov");

    let source = open_source(&SourceSpec::AnimatedImage { path }, &ExportConfig::default()).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let ok_tx = tx.clone();
    let done = Completion::new(
        move || ok_tx.send(None).unwrap(),
        move |err| tx.send(Some(err)).unwrap(),
    );
    SessionController::with_parts(source, Box::new(InMemorySink::new(&out)), &ExportConfig::default(), done)
        .unwrap()
        .run()
        .unwrap();

    match rx.recv().unwrap() {
        Some(Some(MuxError::AppendRejected(_))) => {}
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!out.exists());
}

#[test]
fn still_png_is_a_construction_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    image::save_buffer_with_format(
        &path,
        &[9, 9, 9, 255],
        1,
        1,
        image::ExtendedColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .unwrap();

    let err = open_source(&SourceSpec::AnimatedImage { path }, &ExportConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, MuxError::Construction(_)));
}

#[test]
fn missing_file_is_a_construction_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = open_source(
        &SourceSpec::AnimatedImage {
            path: dir.path().join("nope.png"),
        },
        &ExportConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, MuxError::Construction(_)));
}
