//! End-to-end tests: MML in, patched binary image out
//!
//! These drive the full pipeline through the famidrv reference engine and
//! verify the emitted bytes. The famidrv layout per track: a 10-byte header
//! of 2-byte little-endian pointers to the five channel streams, followed by
//! the channel streams, followed by any pattern streams.

use mgcints::engine::{create_engine, Engine};
use mgcints::error::Error;
use mgcints::mml::parser::Parser;
use mgcints::Compiler;
use std::fs::OpenOptions;
use std::io::Cursor as IoCursor;
use tempfile::tempdir;

const IMAGE_SIZE: usize = 0x4000;

/// Offset of channel 1's stream within a track slot.
const CH1: usize = 10;

fn compile(mml: &str) -> Vec<u8> {
    try_compile(mml).expect("compilation failed")
}

fn try_compile(mml: &str) -> Result<Vec<u8>, Error> {
    try_compile_tracks(&[(mml.to_string(), 1)])
}

fn try_compile_tracks(inputs: &[(String, u32)]) -> Result<Vec<u8>, Error> {
    let mut engine = create_engine("famidrv")?;
    let mut file = IoCursor::new(vec![0u8; IMAGE_SIZE]);
    let mut compiler = Compiler::new();
    compiler.process_file(&mut engine, inputs, &mut file)?;
    Ok(file.into_inner())
}

#[test]
fn test_basic_note() {
    let image = compile("c4");
    // header points at channel 1's stream: file 10, address $800A
    assert_eq!(&image[0..2], &[0x0A, 0x80]);
    // o4 c = pitch 48, quarter note = 24 frames, then halt
    assert_eq!(&image[CH1..CH1 + 3], &[0x30, 24, 0x17]);
    // silent channels carry only the halt terminator
    assert_eq!(image[CH1 + 3], 0x17);
    assert_eq!(&image[2..4], &[0x0D, 0x80]);
}

#[test]
fn test_octave_commands() {
    let image = compile("o5 c4 > c4 < c4");
    assert_eq!(
        &image[CH1..CH1 + 7],
        &[0x3C, 24, 0x48, 24, 0x3C, 24, 0x17]
    );
}

#[test]
fn test_note_length_defaults() {
    // without a length the note uses the running default; `l8` changes it
    let image = compile("c l8 c c2");
    assert_eq!(
        &image[CH1..CH1 + 7],
        &[0x30, 24, 0x30, 12, 0x30, 48, 0x17]
    );
}

#[test]
fn test_rest_and_controls() {
    let image = compile("t150 v10 @3 r8");
    assert_eq!(
        &image[CH1..CH1 + 9],
        &[0xF0, 150, 0xF1, 10, 0xF2, 3, 0x60, 12, 0x17]
    );
}

#[test]
fn test_loop_epilogue_without_loop_point() {
    let image = compile("c4");
    assert_eq!(image[CH1 + 2], 0x17);
}

#[test]
fn test_loop_epilogue_with_loop_point() {
    // LOOP at offset 0 resolves to the stream base $800A, big-endian
    let image = compile("L c4");
    assert_eq!(&image[CH1..CH1 + 5], &[0x30, 24, 0x16, 0x80, 0x0A]);
}

#[test]
fn test_loop_expansion() {
    let image = compile("[c8]3");
    assert_eq!(
        &image[CH1..CH1 + 7],
        &[0x30, 12, 0x30, 12, 0x30, 12, 0x17]
    );
}

#[test]
fn test_nested_loops() {
    let image = compile("[[c8]2 d8]2");
    let one_pass = [0x30, 12, 0x30, 12, 0x32, 12];
    let mut expected = Vec::new();
    expected.extend_from_slice(&one_pass);
    expected.extend_from_slice(&one_pass);
    expected.push(0x17);
    assert_eq!(&image[CH1..CH1 + expected.len()], expected.as_slice());
}

#[test]
fn test_unclosed_loop_fails() {
    let err = try_compile("[c8").unwrap_err();
    assert!(err.to_string().contains("Unmatched loop start"));
}

#[test]
fn test_unmatched_loop_end_fails() {
    let err = try_compile("c8]2").unwrap_err();
    assert!(err.to_string().contains("Unmatched loop end"));
}

#[test]
fn test_invalid_loop_count_fails() {
    let err = try_compile("[c8]0").unwrap_err();
    assert!(err.to_string().contains("Invalid loop count"));
}

#[test]
fn test_raw_insert_variadic_terminates_at_blank_line() {
    let image = compile("`1 2 3\n\nc4");
    assert_eq!(&image[CH1..CH1 + 6], &[1, 2, 3, 0x30, 24, 0x17]);
}

#[test]
fn test_accidentals_and_key_signature() {
    // K+f sharpens f; an explicit accidental or `=` overrides
    let image = compile("K+f f4 f=4 f-4");
    assert_eq!(
        &image[CH1..CH1 + 7],
        &[0x36, 24, 0x35, 24, 0x34, 24, 0x17]
    );
}

#[test]
fn test_note_out_of_range_is_traced() {
    let err = try_compile("o7 b++++4").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Note out of range"));
    assert!(text.contains("line 1"));
}

#[test]
fn test_unknown_command_is_traced() {
    let err = try_compile("c4\n~z").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Unknown command"));
    assert!(text.contains("line 2"));
}

#[test]
fn test_mute_suppresses_channel_bytes() {
    let image = compile("@mute c4");
    // channel 1 emits nothing, not even the epilogue; channel 2 follows
    // immediately and carries only its halt byte
    assert_eq!(&image[0..2], &[0x0A, 0x80]);
    assert_eq!(&image[2..4], &[0x0A, 0x80]);
    assert_eq!(image[CH1], 0x17);
}

#[test]
fn test_channel_select_routes_commands() {
    let image = compile("!2 c4");
    // channel 1 holds only the halt; channel 2 carries the note
    assert_eq!(&image[CH1..CH1 + 1], &[0x17]);
    assert_eq!(&image[CH1 + 1..CH1 + 4], &[0x30, 24, 0x17]);
}

#[test]
fn test_channel_select_multiple() {
    let image = compile("!12 c4");
    assert_eq!(&image[CH1..CH1 + 3], &[0x30, 24, 0x17]);
    assert_eq!(&image[CH1 + 3..CH1 + 6], &[0x30, 24, 0x17]);
}

#[test]
fn test_remap_and_select() {
    let image = compile("#remap 2 X\n!X c4");
    assert_eq!(&image[CH1..CH1 + 1], &[0x17]);
    assert_eq!(&image[CH1 + 1..CH1 + 4], &[0x30, 24, 0x17]);
}

#[test]
fn test_unknown_channel_fails() {
    let err = try_compile("!Q c4").unwrap_err();
    assert!(err.to_string().contains("Unknown channel"));
}

#[test]
fn test_preprocessor_conditionals() {
    let with = compile("#define FAST\n#ifdef FAST\nc8\n#else\nc2\n#endif");
    assert_eq!(&with[CH1..CH1 + 2], &[0x30, 12]);
    let without = compile("#ifdef FAST\nc8\n#else\nc2\n#endif");
    assert_eq!(&without[CH1..CH1 + 2], &[0x30, 48]);
}

#[test]
fn test_preprocessor_if_comparison() {
    let image = compile("#define SPEED 3\n#if SPEED > 2\nc8\n#endif");
    assert_eq!(&image[CH1..CH1 + 2], &[0x30, 12]);
}

#[test]
fn test_comments() {
    let image = compile("c4 ; rest of line ignored\n/* block\ncomment */ d4");
    assert_eq!(&image[CH1..CH1 + 5], &[0x30, 24, 0x32, 24, 0x17]);
}

#[test]
fn test_text_macro_splices() {
    let image = compile("$$riff c4 d4\n$riff $riff");
    assert_eq!(
        &image[CH1..CH1 + 9],
        &[0x30, 24, 0x32, 24, 0x30, 24, 0x32, 24, 0x17]
    );
}

#[test]
fn test_undefined_macro_fails() {
    let err = try_compile("$nope").unwrap_err();
    assert!(err.to_string().contains("Undefined macro"));
}

#[test]
fn test_pattern_compiles_once_and_emits_pointers() {
    let image = compile("$<intro c4\n$>intro\n$>intro");
    // channel streams: ch1 = two pointers + halt, ch2..5 = halt each;
    // the pattern stream lands after them at file 19 = $8013
    assert_eq!(&image[CH1..CH1 + 5], &[0x13, 0x80, 0x13, 0x80, 0x17]);
    assert_eq!(&image[19..21], &[0x30, 24]);
}

#[test]
fn test_undefined_pattern_fails() {
    let err = try_compile("$>nope").unwrap_err();
    assert!(err.to_string().contains("Undefined pattern"));
}

#[test]
fn test_multiple_songs_land_in_their_track_slots() {
    let image = try_compile_tracks(&[("c4".to_string(), 1), ("d4".to_string(), 2)]).unwrap();
    assert_eq!(&image[CH1..CH1 + 2], &[0x30, 24]);
    // track 2 begins at file 0x1000, address $9000
    assert_eq!(&image[0x1000..0x1002], &[0x0A, 0x90]);
    assert_eq!(&image[0x1000 + CH1..0x1000 + CH1 + 2], &[0x32, 24]);
}

#[test]
fn test_setup_and_insert_are_cleared_after_a_run() {
    let mut engine = create_engine("famidrv").unwrap();
    let mut file = IoCursor::new(vec![0u8; IMAGE_SIZE]);
    let mut compiler = Compiler::new();
    compiler
        .process_file(&mut engine, &[("c4".to_string(), 1)], &mut file)
        .unwrap();
    let first = file.get_ref().clone();

    // a second run on the same engine patches nothing
    compiler
        .process_file(&mut engine, &[("d4".to_string(), 1)], &mut file)
        .unwrap();
    assert_eq!(file.get_ref(), &first);
}

#[test]
fn test_strict_mode_rejects_non_ascii() {
    let mut engine = create_engine("famidrv").unwrap();
    let mut file = IoCursor::new(vec![0u8; IMAGE_SIZE]);
    let mut compiler = Compiler::new();
    compiler.set_strict(true);
    let err = compiler
        .process_file(&mut engine, &[("c4 ; héllo".to_string(), 1)], &mut file)
        .unwrap_err();
    assert!(err.to_string().contains("ASCII"));
}

#[test]
fn test_writable_range_protection() {
    // a one-channel engine whose writable window is smaller than its output
    let mut engine = Engine::new("tiny", 1, Parser::new().unwrap()).unwrap();
    engine.on_setup(|engine, _| {
        engine.linker.writable(0, 3);
        engine.linker.set_pos(0);
        Ok(())
    });
    engine.on_insert(|engine, output, song, _| {
        let main = song.channel(0).main_stream();
        engine.linker.add_stream(&mut song.streams, main)?;
        engine.linker.flush(&song.streams, output)
    });

    let mut file = IoCursor::new(vec![0u8; 16]);
    let mut compiler = Compiler::new();
    let err = compiler
        .process_file(&mut engine, &[("`1 2 3 4 5".to_string(), 1)], &mut file)
        .unwrap_err();
    assert!(err.to_string().contains("protected range"));
}

#[test]
fn test_patches_a_real_image_file_in_place() {
    // the frontend's output path: create the image, zero-fill it to the
    // engine's size, patch it through process_file, re-read it from disk
    let dir = tempdir().unwrap();
    let path = dir.path().join("game.nes");

    let mut engine = create_engine("famidrv").unwrap();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .unwrap();
    if file.metadata().unwrap().len() < engine.image_size() {
        file.set_len(engine.image_size()).unwrap();
    }

    let mut compiler = Compiler::new();
    compiler
        .process_file(&mut engine, &[("L c4".to_string(), 1)], &mut file)
        .unwrap();
    drop(file);

    let image = std::fs::read(&path).unwrap();
    assert_eq!(image.len(), IMAGE_SIZE);
    assert_eq!(&image[0..2], &[0x0A, 0x80]);
    assert_eq!(&image[CH1..CH1 + 5], &[0x30, 24, 0x16, 0x80, 0x0A]);
    // untouched bytes stay zero-filled
    assert!(image[0x1000..].iter().all(|&b| b == 0));
}

#[test]
fn test_shebang_is_ignored() {
    let image = compile("#!mgcints famidrv\nc4");
    assert_eq!(&image[CH1..CH1 + 3], &[0x30, 24, 0x17]);
}
