//! Reference engine: a small NES-style sequence driver
//!
//! Five channels compile to a compact byte code: a note is a pitch byte
//! (octave * 12 + semitone) followed by a frame count, a rest is `0x60`
//! plus a frame count, and the control prefixes `0xF0`/`0xF1`/`0xF2` carry
//! tempo, volume and instrument changes. Each channel ends with `0x17`, or
//! with `0x16` plus a big-endian pointer to its `LOOP` label when one was
//! set. A song is inserted as a pointer table over its channel streams.

use crate::codegen::chunk::{Chunk, Endian};
use crate::codegen::stream::START_LABEL;
use crate::engine::feature::{self, key_shift};
use crate::engine::{Engine, PatchFile};
use crate::engine::song::Song;
use crate::error::{Error, Result};
use crate::mml::command::Builder;
use crate::mml::lexer;
use crate::mml::parser::Parser;
use crate::mml::table::MacroTable;
use std::collections::HashMap;

/// Frames per whole note.
const WHOLE_FRAMES: i64 = 96;
/// Pitch byte emitted for a rest.
const REST: u8 = 0x60;
/// Channel terminator without a loop.
const HALT: u8 = 0x17;
/// Channel terminator with a loop target.
const JUMP: u8 = 0x16;

const LOOP_LABEL: &str = "LOOP";

/// PRG bank origin in target-address space.
const ORIGIN: i64 = 0x8000;
/// Bytes reserved per track slot.
const TRACK_STRIDE: u64 = 0x1000;

fn frames_of(length: i64) -> Result<i64> {
    if length < 1 || length > WHOLE_FRAMES {
        return Err(Error::Command(format!("Invalid note length {length}")));
    }
    Ok(WHOLE_FRAMES / length)
}

fn install_commands(table: &mut MacroTable) -> Result<()> {
    // notes: accidental run, then an optional length
    for (letter, semitone) in [
        ('c', 0),
        ('d', 2),
        ('e', 4),
        ('f', 5),
        ('g', 7),
        ('a', 9),
        ('b', 11),
    ] {
        table.add_variants(
            &letter.to_string(),
            Builder::new()
                .param(lexer::acc)
                .param(lexer::uint)
                .optional()
                .on_channel(move |ctx, params| {
                    let shift = key_shift(&ctx.chan.ext.keysig, letter, &params[0]);
                    let pitch = ctx.chan.ext.octave * 12 + semitone + shift;
                    if !(0..0x60).contains(&pitch) {
                        return Err(Error::Command(format!("Note out of range: {letter}")));
                    }
                    let frames = match params.get(1) {
                        Some(v) => frames_of(v.as_int())?,
                        None => ctx.chan.var("len"),
                    };
                    ctx.chan.ext.last_note = Some(pitch as i64);
                    ctx.emit_bytes(&[pitch as u8, frames as u8]);
                    Ok(())
                })
                .make()?,
        );
    }

    // rest
    table.add_variants(
        "r",
        Builder::new()
            .param(lexer::uint)
            .optional()
            .on_channel(|ctx, params| {
                let frames = match params.first() {
                    Some(v) => frames_of(v.as_int())?,
                    None => ctx.chan.var("len"),
                };
                ctx.emit_bytes(&[REST, frames as u8]);
                Ok(())
            })
            .make()?,
    );

    // default length
    table.add_variants(
        "l",
        Builder::new()
            .param(lexer::uint)
            .on_channel(|ctx, params| {
                let frames = frames_of(params[0].as_int())?;
                ctx.chan.set_var("len", frames);
                Ok(())
            })
            .make()?,
    );

    // octave
    table.add_variants(
        "o",
        Builder::new()
            .param(lexer::uint8)
            .on_channel(|ctx, params| {
                let octave = params[0].as_int();
                if !(0..8).contains(&octave) {
                    return Err(Error::Command(format!("Invalid octave {octave}")));
                }
                ctx.chan.ext.octave = octave as i32;
                Ok(())
            })
            .make()?,
    );
    table.add_variants(
        ">",
        Builder::new()
            .on_channel(|ctx, _| {
                ctx.chan.ext.octave += 1;
                Ok(())
            })
            .make()?,
    );
    table.add_variants(
        "<",
        Builder::new()
            .on_channel(|ctx, _| {
                ctx.chan.ext.octave -= 1;
                Ok(())
            })
            .make()?,
    );

    // tempo
    table.add_variants(
        "t",
        Builder::new()
            .param(lexer::uint8)
            .on_channel(|ctx, params| {
                ctx.emit_bytes(&[0xF0, params[0].as_int() as u8]);
                Ok(())
            })
            .make()?,
    );

    // volume
    table.add_variants(
        "v",
        Builder::new()
            .param(lexer::uint8)
            .on_channel(|ctx, params| {
                let volume = params[0].as_int();
                if volume > 15 {
                    return Err(Error::Command(format!("Invalid volume {volume}")));
                }
                ctx.emit_bytes(&[0xF1, volume as u8]);
                Ok(())
            })
            .make()?,
    );

    // instrument
    table.add_variants(
        "@",
        Builder::new()
            .param(lexer::uint8)
            .on_channel(|ctx, params| {
                ctx.emit_bytes(&[0xF2, params[0].as_int() as u8]);
                Ok(())
            })
            .make()?,
    );

    // loops
    table.add_variants(
        "[",
        Builder::new()
            .on_channel(|ctx, _| {
                ctx.push_stream();
                Ok(())
            })
            .make()?,
    );
    table.add_variants(
        "]",
        Builder::new()
            .param(lexer::uint)
            .default("2")
            .on_channel(|ctx, params| {
                let count = params[0].as_int();
                if count < 1 {
                    return Err(Error::Command(format!("Invalid loop count {count}")));
                }
                let body = ctx.pop_stream()?;
                ctx.join(body, count as u64)?;
                Ok(())
            })
            .make()?,
    );

    // loop point
    table.add_variants(
        "L",
        Builder::new()
            .on_channel(|ctx, _| ctx.add_label(LOOP_LABEL))
            .make()?,
    );

    Ok(())
}

fn insert_song(
    engine: &mut Engine,
    output: &mut dyn PatchFile,
    song: &mut Song,
    track: u32,
) -> Result<()> {
    if track < 1 {
        return Err(Error::Argument(format!("Invalid track number {track}")));
    }
    engine.linker.set_pos((track as u64 - 1) * TRACK_STRIDE);

    // pointer table over the channel streams
    let header = song.streams.alloc();
    for index in 0..song.channel_count() {
        let main = song.channel(index).main_stream();
        let pointer = Chunk::pointer(main, START_LABEL, 2, Endian::Little)?;
        song.streams.get_mut(header).push(pointer);
    }
    engine.linker.add_stream(&mut song.streams, header)?;

    for index in 0..song.channel_count() {
        let main = song.channel(index).main_stream();
        engine.linker.add_stream(&mut song.streams, main)?;
    }

    // pattern bodies, in a stable order
    let mut patterns: Vec<_> = song.pattern_streams.iter().collect();
    patterns.sort_by(|a, b| a.0.cmp(b.0));
    for (_, &id) in patterns {
        engine.linker.add_stream(&mut song.streams, id)?;
    }

    engine.linker.flush(&song.streams, output)
}

/// Build the engine definition.
pub fn engine() -> Result<Engine> {
    let mut engine = Engine::new("famidrv", 5, Parser::new()?)?;
    engine.set_image_size(0x4000);
    engine.set_pattern_pointer(2, Endian::Little);

    engine.import_feature(feature::mute()?, &HashMap::new())?;
    engine.import_feature(feature::keysig()?, &HashMap::new())?;
    install_commands(&mut engine.parser.commands)?;

    engine.add_chan_init(|chan| {
        chan.ext.octave = 4;
        chan.set_var("len", WHOLE_FRAMES / 4);
    });

    // channel epilogue: jump to the loop point, or halt
    engine.add_chan_post(|ctx| {
        let main = ctx.chan.main_stream();
        if ctx.streams.get(main).has_label(LOOP_LABEL) {
            ctx.emit_byte(JUMP);
            ctx.emit(Chunk::pointer(main, LOOP_LABEL, 2, Endian::Big)?);
        } else {
            ctx.emit_byte(HALT);
        }
        Ok(())
    });

    engine.on_setup(|engine, _output| {
        engine.linker.set_delta(ORIGIN);
        engine.linker.writable(ORIGIN as u64, 0xBFFF);
        Ok(())
    });
    engine.on_insert(insert_song);

    Ok(engine)
}
