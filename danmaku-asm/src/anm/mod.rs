//! The sprite-animation language and its container.
//!
//! An animation file is a linked list of entries joined by next-offset
//! fields. Each entry carries texture metadata, a sprite table, a script
//! table and optionally a `THTX` pixel blob. Two entry-header layouts
//! exist; they hold the same fields in a different order and are
//! normalised on read.

pub mod expr;
pub mod reg;

mod parse;
mod print;

use danmaku_types::{Value, ValueError};

use crate::ir::{Instr, Node, Param, Sub};
use crate::tables::anm_format;
use crate::{AsmError, MnemonicMap};

/// One sprite: a rectangle in the entry's texture.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sprite {
    /// Sprite id, referenced by `n` parameters.
    pub id: u32,
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub w: f32,
    /// Height.
    pub h: f32,
}

/// One animation script.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Script {
    /// Script id, referenced by `N` parameters.
    pub id: i32,
    /// Body and labels.
    pub body: Sub,
}

/// A raw pixel blob.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Thtx {
    /// Pixel format code.
    pub format: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Size field as stored; may disagree with `width * height * Bpp`.
    pub size: u32,
    /// The pixels, `width * height * Bpp` bytes.
    pub data: Vec<u8>,
}

/// One entry of an animation file.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entry {
    /// Script-format version.
    pub version: u32,
    /// Texture path.
    pub name: String,
    /// Secondary texture path of the oldest format.
    pub name2: Option<String>,
    /// Pixel format code of the entry header.
    pub format: u32,
    /// Texture width.
    pub width: u32,
    /// Texture height.
    pub height: u32,
    /// X placement.
    pub x: u32,
    /// Y placement.
    pub y: u32,
    /// Purpose field; observed values are 0, 1, 10 and 11.
    pub unknown1: u32,
    /// Sprites in table order.
    pub sprites: Vec<Sprite>,
    /// Scripts in table order.
    pub scripts: Vec<Script>,
    /// Pixel data, when the entry embeds any.
    pub thtx: Option<Thtx>,
}

/// A whole animation file.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnmFile {
    /// Entries in file order.
    pub entries: Vec<Entry>,
}

const HEADER_SIZE: usize = 64;
const SENTINEL_OPCODE: u16 = 0xffff;

/// Bytes per pixel of a format code. Unknown codes are treated as 4 and
/// diagnosed by the caller.
pub fn format_bpp(format: u16) -> u32 {
    match format {
        1 | 6 => 4,
        3 | 5 => 2,
        7 => 1,
        _ => 4,
    }
}

/// Whether a script-format version uses the 8-byte instruction header.
fn wide_instrs(version: u32) -> bool {
    version != 0
}

fn u16_at(data: &[u8], at: usize) -> Result<u16, AsmError> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| AsmError::Corrupt(format!("truncated image at {at}")))
}

fn u32_at(data: &[u8], at: usize) -> Result<u32, AsmError> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| AsmError::Corrupt(format!("truncated image at {at}")))
}

fn f32_at(data: &[u8], at: usize) -> Result<f32, AsmError> {
    Ok(f32::from_bits(u32_at(data, at)?))
}

fn cstr_at(data: &[u8], at: usize) -> Result<String, AsmError> {
    let tail = data.get(at..).ok_or_else(|| AsmError::Corrupt("name out of range".into()))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| AsmError::Corrupt("unterminated name".into()))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// The header fields that differ between the two layouts, normalised.
struct RawHeader {
    sprites: u32,
    scripts: u32,
    width: u32,
    height: u32,
    format: u32,
    name_offset: u32,
    x: u32,
    y: u32,
    version: u32,
    unknown1: u32,
    thtx_offset: u32,
    has_data: u32,
    next_offset: u32,
}

fn read_header(data: &[u8], at: usize) -> Result<RawHeader, AsmError> {
    // The old layout keeps a zero word third; when it is not zero this is
    // the reordered layout that starts with the version instead.
    let old = u32_at(data, at + 8)? == 0;

    Ok(if old {
        RawHeader {
            sprites: u32_at(data, at)?,
            scripts: u32_at(data, at + 4)?,
            width: u32_at(data, at + 12)?,
            height: u32_at(data, at + 16)?,
            format: u32_at(data, at + 20)?,
            name_offset: u32_at(data, at + 28)?,
            x: u32_at(data, at + 32)?,
            y: u32_at(data, at + 36)?,
            version: u32_at(data, at + 40)?,
            unknown1: u32_at(data, at + 44)?,
            thtx_offset: u32_at(data, at + 48)?,
            has_data: u32_at(data, at + 52)?,
            next_offset: u32_at(data, at + 56)?,
        }
    } else {
        RawHeader {
            version: u32_at(data, at)?,
            sprites: u32::from(u16_at(data, at + 4)?),
            scripts: u32::from(u16_at(data, at + 6)?),
            width: u32::from(u16_at(data, at + 10)?),
            height: u32::from(u16_at(data, at + 12)?),
            format: u32::from(u16_at(data, at + 14)?),
            name_offset: u32_at(data, at + 16)?,
            x: u32::from(u16_at(data, at + 20)?),
            y: u32::from(u16_at(data, at + 22)?),
            unknown1: u32_at(data, at + 24)?,
            thtx_offset: u32_at(data, at + 28)?,
            has_data: u32_at(data, at + 32)?,
            next_offset: u32_at(data, at + 36)?,
        }
    })
}

fn read_script(
    version: u32,
    data: &[u8],
    name: String,
    start: usize,
    end: usize,
) -> Result<Sub, AsmError> {
    let mut sub = Sub::named(name);
    sub.offset = start as u32;

    let end = end.min(data.len());
    let wide = wide_instrs(version);
    let header = if wide { 8 } else { 4 };
    let mut time = 0i32;
    let mut pos = start;
    let mut end_of_instrs = pos;

    while pos + header <= end {
        let (opcode, size, instr_time, stack_mask) = if wide {
            let opcode = u16_at(data, pos)?;
            let length = u16_at(data, pos + 2)? as usize;
            let time = i32::from(u16_at(data, pos + 4)? as i16);
            let mask = u16_at(data, pos + 6)?;
            (opcode, length, time, mask)
        } else {
            let time = i32::from(u16_at(data, pos)? as i16);
            let opcode = u16::from(data[pos + 2]);
            let length = header + usize::from(data[pos + 3]);
            (opcode, length, time, 0)
        };

        if opcode == SENTINEL_OPCODE {
            pos += size.max(header);
            break;
        }
        if size < header || pos + size > end {
            // A zero-size instruction terminates the stream.
            if size == 0 {
                break;
            }
            return Err(AsmError::Corrupt(format!(
                "{}: instruction size {size} at {pos} escapes the script",
                sub.name
            )));
        }

        if instr_time != time {
            sub.nodes.push(Node::Time(instr_time));
            time = instr_time;
        }

        let body = &data[pos + header..pos + size];
        let params = match anm_format(version, opcode) {
            Some(format) => read_anm_params(body, format, u32::from(stack_mask))?,
            None => {
                tracing::warn!(opcode, version, "opcode not in the format table, keeping raw");
                vec![Param::new(crate::ecl::RAW_TAG, Value::Blob(body.to_vec()))]
            }
        };

        sub.nodes.push(Node::Instr(Instr {
            opcode,
            time: instr_time,
            rank: 0xff,
            params,
            offset: (pos - start) as u32,
        }));

        pos += size;
        end_of_instrs = pos;
    }

    crate::ecl::insert_labels(&mut sub, (end_of_instrs - start) as u32);
    Ok(sub)
}

/// Animation scripts only use the plain tags plus the 32-bit reference
/// tags.
fn read_anm_value(data: &[u8], tag: char) -> Result<(Value, usize), ValueError> {
    match tag {
        'o' | 't' | 'n' | 'N' => Value::from_data(data, 'S'),
        _ => Value::from_data(data, tag),
    }
}

fn read_anm_params(data: &[u8], format: &str, mut stack_mask: u32) -> Result<Vec<Param>, AsmError> {
    let values = Value::list_from_data(read_anm_value, data, format)?;
    let tags = crate::ecl::expand_format(format, values.len());
    Ok(values
        .into_iter()
        .zip(tags)
        .map(|(value, tag)| {
            let stack = stack_mask & 1 != 0;
            stack_mask >>= 1;
            Param { tag, value, stack }
        })
        .collect())
}

fn read_entry(data: &[u8], at: usize) -> Result<(Entry, u32), AsmError> {
    let header = read_header(data, at)?;

    let name = cstr_at(data, at + header.name_offset as usize)?;
    let name2 = if header.version == 0 && header.y != 0 {
        Some(cstr_at(data, at + header.y as usize)?)
    } else {
        None
    };

    let mut sprites = Vec::with_capacity(header.sprites as usize);
    let sprite_offsets_at = at + HEADER_SIZE;
    for i in 0..header.sprites as usize {
        let sprite_at = at + u32_at(data, sprite_offsets_at + i * 4)? as usize;
        sprites.push(Sprite {
            id: u32_at(data, sprite_at)?,
            x: f32_at(data, sprite_at + 4)?,
            y: f32_at(data, sprite_at + 8)?,
            w: f32_at(data, sprite_at + 12)?,
            h: f32_at(data, sprite_at + 16)?,
        });
    }

    let script_table_at = sprite_offsets_at + header.sprites as usize * 4;
    let mut script_heads = Vec::with_capacity(header.scripts as usize);
    for i in 0..header.scripts as usize {
        let id = u32_at(data, script_table_at + i * 8)? as i32;
        let offset = u32_at(data, script_table_at + i * 8 + 4)? as usize;
        script_heads.push((id, offset));
    }

    // Script bodies run to the next script, or to the pixel data / next
    // entry / end of image.
    let entry_end = if header.next_offset != 0 {
        at + header.next_offset as usize
    } else {
        data.len()
    };
    let body_end = if header.has_data != 0 && header.thtx_offset != 0 {
        at + header.thtx_offset as usize
    } else {
        entry_end
    };

    let mut scripts = Vec::with_capacity(script_heads.len());
    for (i, (id, offset)) in script_heads.iter().enumerate() {
        let end = script_heads.get(i + 1).map(|(_, o)| at + *o).unwrap_or(body_end);
        let body = read_script(
            header.version,
            data,
            format!("script{id}"),
            at + offset,
            end,
        )?;
        scripts.push(Script { id: *id, body });
    }

    let thtx = if header.has_data != 0 && header.thtx_offset != 0 {
        let thtx_at = at + header.thtx_offset as usize;
        if data.get(thtx_at..thtx_at + 4) != Some(b"THTX") {
            return Err(AsmError::InvalidMagic("THTX"));
        }
        let format = u16_at(data, thtx_at + 6)?;
        let width = u16_at(data, thtx_at + 8)?;
        let height = u16_at(data, thtx_at + 10)?;
        let size = u32_at(data, thtx_at + 12)?;

        // The declared product is what gets read; a disagreeing size
        // field is tolerated.
        let declared = u32::from(width) * u32::from(height) * format_bpp(format);
        if declared != size {
            tracing::warn!(name = %name, declared, size, "texture size disagrees with its header");
        }
        let pixels_at = thtx_at + 16;
        let pixels = data
            .get(pixels_at..pixels_at + declared as usize)
            .ok_or_else(|| AsmError::Corrupt("pixel data out of range".into()))?;

        Some(Thtx { format, width, height, size, data: pixels.to_vec() })
    } else {
        None
    };

    // When the secondary name is present its offset rides in `y`; the
    // field is recomputed on write, so it reads back as zero.
    let y = if name2.is_some() { 0 } else { header.y };

    Ok((
        Entry {
            version: header.version,
            name,
            name2,
            format: header.format,
            width: header.width,
            height: header.height,
            x: header.x,
            y,
            unknown1: header.unknown1,
            sprites,
            scripts,
            thtx,
        },
        header.next_offset,
    ))
}

fn align4(at: usize) -> usize {
    (at + 3) & !3
}

fn anm_param_size(param: &Param) -> usize {
    match param.tag {
        'o' | 't' | 'n' | 'N' => 4,
        _ => param.value.wire_size(),
    }
}

fn anm_instr_size(version: u32, instr: &Instr) -> usize {
    let header = if wide_instrs(version) { 8 } else { 4 };
    header + instr.params.iter().map(anm_param_size).sum::<usize>()
}

/// Bind offsets and labels of one script body (assembly pass one).
fn bind_offsets(version: u32, sub: &mut Sub) {
    sub.labels.clear();
    let mut offset = 0u32;
    let mut time = 0i32;
    let mut labels = Vec::new();
    for node in sub.nodes.iter_mut() {
        match node {
            Node::Instr(instr) => {
                instr.offset = offset;
                offset += anm_instr_size(version, instr) as u32;
                time = instr.time;
            }
            Node::Time(t) => time = *t,
            Node::Label(name) => labels.push(crate::ir::Label { name: name.clone(), offset, time }),
            Node::Rank(_) => {}
        }
    }
    sub.labels = labels;
}

fn write_script(version: u32, script: &mut Script, out: &mut Vec<u8>) -> Result<(), AsmError> {
    bind_offsets(version, &mut script.body);
    let wide = wide_instrs(version);

    for node in &script.body.nodes {
        let Node::Instr(instr) = node else { continue };
        let size = anm_instr_size(version, instr);

        if wide {
            out.extend_from_slice(&instr.opcode.to_le_bytes());
            out.extend_from_slice(&(size as u16).to_le_bytes());
            out.extend_from_slice(&(instr.time as i16).to_le_bytes());
            out.extend_from_slice(&instr.stack_ref_mask().to_le_bytes());
        } else {
            out.extend_from_slice(&(instr.time as i16).to_le_bytes());
            out.push(instr.opcode as u8);
            out.push((size - 4) as u8);
        }

        for param in &instr.params {
            if param.tag == crate::ecl::RAW_TAG {
                param.value.to_data(out);
            } else {
                crate::ecl::write_param(out, &script.body, instr, param)?;
            }
        }
    }

    if wide {
        // Terminating instruction.
        out.extend_from_slice(&SENTINEL_OPCODE.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    Ok(())
}

fn write_entry(entry: &Entry, out: &mut Vec<u8>, last: bool) -> Result<(), AsmError> {
    let base = out.len();
    out.resize(base + HEADER_SIZE, 0);

    let sprite_offsets_at = out.len();
    out.resize(out.len() + entry.sprites.len() * 4, 0);
    let script_table_at = out.len();
    out.resize(out.len() + entry.scripts.len() * 8, 0);

    let name_offset = (out.len() - base) as u32;
    out.extend_from_slice(entry.name.as_bytes());
    out.push(0);
    let len = out.len();
    out.resize(align4(len), 0);

    let mut name2_offset = 0u32;
    if let Some(name2) = &entry.name2 {
        name2_offset = (out.len() - base) as u32;
        out.extend_from_slice(name2.as_bytes());
        out.push(0);
        let len = out.len();
        out.resize(align4(len), 0);
    }

    for (i, sprite) in entry.sprites.iter().enumerate() {
        let offset = (out.len() - base) as u32;
        let at = sprite_offsets_at + i * 4;
        out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&sprite.id.to_le_bytes());
        out.extend_from_slice(&sprite.x.to_le_bytes());
        out.extend_from_slice(&sprite.y.to_le_bytes());
        out.extend_from_slice(&sprite.w.to_le_bytes());
        out.extend_from_slice(&sprite.h.to_le_bytes());
    }

    let mut scripts = entry.scripts.clone();
    for (i, script) in scripts.iter_mut().enumerate() {
        let offset = (out.len() - base) as u32;
        let at = script_table_at + i * 8;
        out[at..at + 4].copy_from_slice(&script.id.to_le_bytes());
        out[at + 4..at + 8].copy_from_slice(&offset.to_le_bytes());
        write_script(entry.version, script, out)?;
    }
    let len = out.len();
    out.resize(align4(len), 0);

    let mut thtx_offset = 0u32;
    if let Some(thtx) = &entry.thtx {
        thtx_offset = (out.len() - base) as u32;
        out.extend_from_slice(b"THTX");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&thtx.format.to_le_bytes());
        out.extend_from_slice(&thtx.width.to_le_bytes());
        out.extend_from_slice(&thtx.height.to_le_bytes());
        out.extend_from_slice(&thtx.size.to_le_bytes());
        out.extend_from_slice(&thtx.data);
        let len = out.len();
        out.resize(align4(len), 0);
    }

    let next_offset = if last { 0 } else { (out.len() - base) as u32 };
    let has_data = u32::from(entry.thtx.is_some());
    let y = entry.name2.as_ref().map(|_| name2_offset).unwrap_or(entry.y);

    let header = &mut out[base..base + HEADER_SIZE];
    if entry.version >= 7 {
        header[0..4].copy_from_slice(&entry.version.to_le_bytes());
        header[4..6].copy_from_slice(&(entry.sprites.len() as u16).to_le_bytes());
        header[6..8].copy_from_slice(&(entry.scripts.len() as u16).to_le_bytes());
        header[10..12].copy_from_slice(&(entry.width as u16).to_le_bytes());
        header[12..14].copy_from_slice(&(entry.height as u16).to_le_bytes());
        header[14..16].copy_from_slice(&(entry.format as u16).to_le_bytes());
        header[16..20].copy_from_slice(&name_offset.to_le_bytes());
        header[20..22].copy_from_slice(&(entry.x as u16).to_le_bytes());
        header[22..24].copy_from_slice(&(y as u16).to_le_bytes());
        header[24..28].copy_from_slice(&entry.unknown1.to_le_bytes());
        header[28..32].copy_from_slice(&thtx_offset.to_le_bytes());
        header[32..36].copy_from_slice(&has_data.to_le_bytes());
        header[36..40].copy_from_slice(&next_offset.to_le_bytes());
    } else {
        header[0..4].copy_from_slice(&(entry.sprites.len() as u32).to_le_bytes());
        header[4..8].copy_from_slice(&(entry.scripts.len() as u32).to_le_bytes());
        header[12..16].copy_from_slice(&entry.width.to_le_bytes());
        header[16..20].copy_from_slice(&entry.height.to_le_bytes());
        header[20..24].copy_from_slice(&entry.format.to_le_bytes());
        header[28..32].copy_from_slice(&name_offset.to_le_bytes());
        header[32..36].copy_from_slice(&entry.x.to_le_bytes());
        header[36..40].copy_from_slice(&y.to_le_bytes());
        header[40..44].copy_from_slice(&entry.version.to_le_bytes());
        header[44..48].copy_from_slice(&entry.unknown1.to_le_bytes());
        header[48..52].copy_from_slice(&thtx_offset.to_le_bytes());
        header[52..56].copy_from_slice(&has_data.to_le_bytes());
        header[56..60].copy_from_slice(&next_offset.to_le_bytes());
    }

    Ok(())
}

impl AnmFile {
    /// Disassemble an animation file image.
    pub fn read(data: &[u8]) -> Result<AnmFile, AsmError> {
        let mut entries = Vec::new();
        let mut at = 0usize;
        loop {
            let (entry, next) = read_entry(data, at)?;
            entries.push(entry);
            if next == 0 {
                break;
            }
            at += next as usize;
            if at >= data.len() {
                return Err(AsmError::Corrupt("entry chain escapes the image".into()));
            }
        }
        Ok(AnmFile { entries })
    }

    /// Serialise back to the binary layout.
    pub fn write(&self) -> Result<Vec<u8>, AsmError> {
        let mut out = Vec::new();
        let count = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            write_entry(entry, &mut out, i + 1 == count)?;
        }
        Ok(out)
    }

    /// Render as textual source in raw mode: every instruction prints as
    /// `ins_<n>(...)` and a re-assembly is byte-identical.
    pub fn dump(&self, map: Option<&MnemonicMap>) -> String {
        print::dump(self, map, false)
    }

    /// Render as textual source, collapsing operator instructions back
    /// into infix expression statements where re-lowering them would
    /// reproduce the same bytes.
    pub fn dump_pretty(&self, map: Option<&MnemonicMap>) -> String {
        print::dump(self, map, true)
    }

    /// Compile textual source.
    pub fn parse(source: &str, map: Option<&MnemonicMap>) -> Result<AnmFile, AsmError> {
        parse::parse(source, map)
    }
}
