use std::sync::Arc;

use chrono::{TimeZone, Utc};
use chatreel::comment::Comment;
use chatreel::encoding::{FrameSink, MemorySink};
use chatreel::error_codes::{find_coded_error, RENDER_CANCELLED};
use chatreel::fonts::{BoxTypeface, FixedFontProvider, FontProvider, Typeface};
use chatreel::images::ImageCollections;
use chatreel::options::ChatRenderOptions;
use chatreel::render::{prepare_pipeline, render_frames, CancellationToken, Progress};

fn box_fonts() -> Box<dyn FontProvider> {
    let face: Arc<dyn Typeface> = Arc::new(BoxTypeface::new());
    Box::new(FixedFontProvider::new(face))
}

fn two_comment_transcript() -> Vec<Comment> {
    let created = Utc
        .with_ymd_and_hms(2024, 5, 1, 20, 0, 0)
        .single()
        .expect("valid time");
    vec![
        Comment::plain("1", 0.0, created, "alice", "Alice", "hi"),
        Comment::plain("2", 1.0, created, "bob", "Bob", "buy cheapfollows now"),
    ]
}

fn options() -> ChatRenderOptions {
    ChatRenderOptions {
        update_rate: 1.0,
        framerate: 30,
        banned_words: vec!["cheapfollows".to_owned()],
        end_time: Some(2.0),
        ..ChatRenderOptions::default()
    }
}

#[test]
fn banned_comment_is_dropped_and_frame_stays_unchanged() {
    let (mut pipeline, window) = prepare_pipeline(
        &options(),
        two_comment_transcript(),
        ImageCollections::default(),
        box_fonts(),
    )
    .expect("pipeline");
    assert_eq!(pipeline.comments().len(), 1);
    assert_eq!(pipeline.comments()[0].id, "1");
    assert_eq!(window.total_frames(30), 60);

    let mut sink = MemorySink::default();
    let mut reports = Vec::new();
    let mut progress = |progress: &Progress| reports.push(progress.frame);
    let frames = render_frames(
        &mut pipeline,
        window.total_frames(30),
        &mut sink,
        None,
        &CancellationToken::new(),
        &mut progress,
    )
    .expect("render");

    assert_eq!(frames, 60);
    assert!(sink.finished);
    assert_eq!(sink.frames.len(), 60);
    assert_eq!(sink.frames[0].len(), 350 * 600 * 4);
    assert_eq!(sink.frames[0], sink.frames[30]);
    assert_eq!(reports, vec![30, 60]);

    let frame = pipeline.update_frame();
    assert_eq!(frame.window.len(), 1);
    assert_eq!(frame.window[0].comment_index, 0);

    // Background everywhere except Alice's section at the bottom.
    let top_left = &sink.frames[0][..4];
    assert_eq!(top_left, [0x11, 0x11, 0x11, 0xFF]);
    let section_top = 600 - 41;
    let differs = sink.frames[0]
        .chunks_exact(4)
        .skip(section_top * 350)
        .any(|pixel| pixel != [0x11, 0x11, 0x11, 0xFF]);
    assert!(differs, "Alice's comment should be drawn");
}

#[test]
fn mask_stream_mirrors_alpha() {
    let options = ChatRenderOptions {
        background_color: chatreel::options::Rgba8::TRANSPARENT,
        ..options()
    };
    let (mut pipeline, _) = prepare_pipeline(
        &options,
        two_comment_transcript(),
        ImageCollections::default(),
        box_fonts(),
    )
    .expect("pipeline");

    let mut video = MemorySink::default();
    let mut mask = MemorySink::default();
    render_frames(
        &mut pipeline,
        3,
        &mut video,
        Some(&mut mask as &mut dyn FrameSink),
        &CancellationToken::new(),
        &mut |_: &Progress| {},
    )
    .expect("render");

    assert_eq!(mask.frames.len(), 3);
    for (color, matte) in video.frames[0].chunks_exact(4).zip(mask.frames[0].chunks_exact(4)) {
        assert_eq!(matte, [color[3], color[3], color[3], 255]);
    }
}

#[test]
fn cancellation_aborts_sinks() {
    let (mut pipeline, window) = prepare_pipeline(
        &options(),
        two_comment_transcript(),
        ImageCollections::default(),
        box_fonts(),
    )
    .expect("pipeline");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut sink = MemorySink::default();
    let error = render_frames(
        &mut pipeline,
        window.total_frames(30),
        &mut sink,
        None,
        &cancel,
        &mut |_: &Progress| {},
    )
    .expect_err("cancelled");

    assert_eq!(
        find_coded_error(&error).map(|coded| coded.code),
        Some(RENDER_CANCELLED)
    );
    assert!(sink.aborted);
    assert!(!sink.finished);
    assert!(sink.frames.is_empty());
}

#[test]
fn invalid_options_are_rejected_before_rendering() {
    let options = ChatRenderOptions {
        framerate: 0,
        ..ChatRenderOptions::default()
    };
    let error = match prepare_pipeline(
        &options,
        two_comment_transcript(),
        ImageCollections::default(),
        box_fonts(),
    ) {
        Ok(_) => panic!("zero framerate should be rejected"),
        Err(error) => error,
    };
    assert_eq!(
        find_coded_error(&error).map(|coded| coded.code),
        Some("INVALID_OPTIONS")
    );
}
