//! Pickle stream machinery: an opcode table covering protocols 0 through 5,
//! a disassembler that lists the primitive operation sequence, and a bounded
//! value decoder that reconstructs literal object graphs.
//!
//! The decoder deliberately refuses every opcode that would require importing
//! or invoking host code (GLOBAL, REDUCE, BUILD, INST, and friends). Those
//! streams still disassemble fine, which is exactly what the opcode inspector
//! needs to flag them.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Upper bound on values materialized by the decoder.
const MAX_ITEMS: usize = 100_000;
/// Rendering depth cap for nested containers.
const MAX_RENDER_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("truncated pickle stream at offset {0}")]
    Truncated(usize),
    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("opcode {0} constructs host objects and is not decoded")]
    Unsupported(&'static str),
    #[error("malformed {what} argument at offset {offset}")]
    Malformed { what: &'static str, offset: usize },
    #[error("pickle stack underflow at offset {0}")]
    StackUnderflow(usize),
    #[error("no MARK on stack at offset {0}")]
    MissingMark(usize),
    #[error("memo key {0} was never stored")]
    MemoMiss(u32),
    #[error("pickle stream ended without STOP")]
    MissingStop,
    #[error("decode limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

/// One disassembled operation.
#[derive(Debug, Clone)]
pub struct Opcode {
    pub offset: usize,
    pub mnemonic: &'static str,
    pub arg: Option<String>,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{} {}", self.mnemonic, arg),
            None => write!(f, "{}", self.mnemonic),
        }
    }
}

/// Literal pickle values the decoder can materialize.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_RENDER_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(v) => out.push_str(&v.to_string()),
            Value::Float(v) => out.push_str(&v.to_string()),
            Value::Str(v) => {
                out.push('\'');
                out.push_str(v);
                out.push('\'');
            }
            Value::Bytes(v) => out.push_str(&format!("<{} bytes>", v.len())),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1);
                }
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1);
                }
                out.push(')');
            }
            Value::Set(items) => {
                out.push('{');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            Value::Dict(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, depth + 1);
                    out.push_str(": ");
                    value.write_repr(out, depth + 1);
                }
                out.push('}');
            }
        }
    }
}

/// String form matching Python's `str()`: bare strings render unquoted,
/// containers render repr-style.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => f.write_str(v),
            other => {
                let mut out = String::new();
                other.write_repr(&mut out, 0);
                f.write_str(&out)
            }
        }
    }
}

#[derive(Clone, Copy)]
enum ArgKind {
    None,
    U1,
    U2,
    I4,
    U4,
    U8,
    F8,
    Line,
    TwoLines,
    StringNl,
    String1,
    String4,
    Unicode1,
    Unicode4,
    Unicode8,
    Bytes1,
    Bytes4,
    Bytes8,
    Long1,
    Long4,
}

fn opcode_info(byte: u8) -> Option<(&'static str, ArgKind)> {
    let info = match byte {
        b'(' => ("MARK", ArgKind::None),
        b'.' => ("STOP", ArgKind::None),
        b'0' => ("POP", ArgKind::None),
        b'1' => ("POP_MARK", ArgKind::None),
        b'2' => ("DUP", ArgKind::None),
        b'F' => ("FLOAT", ArgKind::Line),
        b'I' => ("INT", ArgKind::Line),
        b'J' => ("BININT", ArgKind::I4),
        b'K' => ("BININT1", ArgKind::U1),
        b'L' => ("LONG", ArgKind::Line),
        b'M' => ("BININT2", ArgKind::U2),
        b'N' => ("NONE", ArgKind::None),
        b'P' => ("PERSID", ArgKind::Line),
        b'Q' => ("BINPERSID", ArgKind::None),
        b'R' => ("REDUCE", ArgKind::None),
        b'S' => ("STRING", ArgKind::StringNl),
        b'T' => ("BINSTRING", ArgKind::String4),
        b'U' => ("SHORT_BINSTRING", ArgKind::String1),
        b'V' => ("UNICODE", ArgKind::Line),
        b'X' => ("BINUNICODE", ArgKind::Unicode4),
        b'a' => ("APPEND", ArgKind::None),
        b'b' => ("BUILD", ArgKind::None),
        b'c' => ("GLOBAL", ArgKind::TwoLines),
        b'd' => ("DICT", ArgKind::None),
        b'e' => ("APPENDS", ArgKind::None),
        b'g' => ("GET", ArgKind::Line),
        b'h' => ("BINGET", ArgKind::U1),
        b'i' => ("INST", ArgKind::TwoLines),
        b'j' => ("LONG_BINGET", ArgKind::U4),
        b'l' => ("LIST", ArgKind::None),
        b'o' => ("OBJ", ArgKind::None),
        b'p' => ("PUT", ArgKind::Line),
        b'q' => ("BINPUT", ArgKind::U1),
        b'r' => ("LONG_BINPUT", ArgKind::U4),
        b's' => ("SETITEM", ArgKind::None),
        b't' => ("TUPLE", ArgKind::None),
        b'u' => ("SETITEMS", ArgKind::None),
        b'}' => ("EMPTY_DICT", ArgKind::None),
        b']' => ("EMPTY_LIST", ArgKind::None),
        b')' => ("EMPTY_TUPLE", ArgKind::None),
        b'G' => ("BINFLOAT", ArgKind::F8),
        b'B' => ("BINBYTES", ArgKind::Bytes4),
        b'C' => ("SHORT_BINBYTES", ArgKind::Bytes1),
        0x80 => ("PROTO", ArgKind::U1),
        0x81 => ("NEWOBJ", ArgKind::None),
        0x82 => ("EXT1", ArgKind::U1),
        0x83 => ("EXT2", ArgKind::U2),
        0x84 => ("EXT4", ArgKind::I4),
        0x85 => ("TUPLE1", ArgKind::None),
        0x86 => ("TUPLE2", ArgKind::None),
        0x87 => ("TUPLE3", ArgKind::None),
        0x88 => ("NEWTRUE", ArgKind::None),
        0x89 => ("NEWFALSE", ArgKind::None),
        0x8a => ("LONG1", ArgKind::Long1),
        0x8b => ("LONG4", ArgKind::Long4),
        0x8c => ("SHORT_BINUNICODE", ArgKind::Unicode1),
        0x8d => ("BINUNICODE8", ArgKind::Unicode8),
        0x8e => ("BINBYTES8", ArgKind::Bytes8),
        0x8f => ("EMPTY_SET", ArgKind::None),
        0x90 => ("FROZENSET", ArgKind::None),
        0x91 => ("ADDITEMS", ArgKind::None),
        0x92 => ("NEWOBJ_EX", ArgKind::None),
        0x93 => ("STACK_GLOBAL", ArgKind::None),
        0x94 => ("MEMOIZE", ArgKind::None),
        0x95 => ("FRAME", ArgKind::U8),
        0x96 => ("BYTEARRAY8", ArgKind::Bytes8),
        0x97 => ("NEXT_BUFFER", ArgKind::None),
        0x98 => ("READONLY_BUFFER", ArgKind::None),
        _ => return None,
    };
    Some(info)
}

/// Decoded argument of one operation.
#[derive(Debug, Clone)]
enum Arg {
    None,
    Uint(u64),
    Int(i64),
    Float(f64),
    Text(String),
    TwoText(String, String),
    Data(Vec<u8>),
    WideLong(usize),
}

impl Arg {
    fn display(&self) -> Option<String> {
        match self {
            Arg::None => None,
            Arg::Uint(v) => Some(v.to_string()),
            Arg::Int(v) => Some(v.to_string()),
            Arg::Float(v) => Some(v.to_string()),
            Arg::Text(v) => Some(format!("'{v}'")),
            Arg::TwoText(a, b) => Some(format!("'{a} {b}'")),
            Arg::Data(v) => Some(format!("<{} bytes>", v.len())),
            Arg::WideLong(len) => Some(format!("<{len}-byte long>")),
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn u8(&mut self) -> Result<u8, PickleError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(PickleError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(PickleError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16_le(&mut self) -> Result<u16, PickleError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn i32_le(&mut self) -> Result<i32, PickleError> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u32_le(&mut self) -> Result<u32, PickleError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, PickleError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn f64_be(&mut self) -> Result<f64, PickleError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(f64::from_be_bytes(buf))
    }

    /// Read up to the next newline, excluding it.
    fn line(&mut self) -> Result<String, PickleError> {
        let start = self.pos;
        while self.pos < self.data.len() {
            if self.data[self.pos] == b'\n' {
                let text = latin1(&self.data[start..self.pos]);
                self.pos += 1;
                return Ok(text);
            }
            self.pos += 1;
        }
        Err(PickleError::Truncated(start))
    }

    fn counted(&mut self, len: u64) -> Result<&'a [u8], PickleError> {
        let len = usize::try_from(len).map_err(|_| PickleError::LimitExceeded("argument length"))?;
        self.take(len)
    }
}

/// Pickle protocol 0 strings are latin-1; every byte maps to one char.
fn latin1(data: &[u8]) -> String {
    data.iter().map(|&b| b as char).collect()
}

fn utf8_lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn read_arg(reader: &mut Reader<'_>, kind: ArgKind, offset: usize) -> Result<Arg, PickleError> {
    let arg = match kind {
        ArgKind::None => Arg::None,
        ArgKind::U1 => Arg::Uint(u64::from(reader.u8()?)),
        ArgKind::U2 => Arg::Uint(u64::from(reader.u16_le()?)),
        ArgKind::I4 => Arg::Int(i64::from(reader.i32_le()?)),
        ArgKind::U4 => Arg::Uint(u64::from(reader.u32_le()?)),
        ArgKind::U8 => Arg::Uint(reader.u64_le()?),
        ArgKind::F8 => Arg::Float(reader.f64_be()?),
        ArgKind::Line => Arg::Text(reader.line()?),
        ArgKind::TwoLines => {
            let module = reader.line()?;
            let name = reader.line()?;
            Arg::TwoText(module, name)
        }
        ArgKind::StringNl => {
            let raw = reader.line()?;
            Arg::Text(strip_string_quotes(&raw, offset)?)
        }
        ArgKind::String1 => {
            let len = u64::from(reader.u8()?);
            Arg::Text(latin1(reader.counted(len)?))
        }
        ArgKind::String4 => {
            let len = u64::from(reader.u32_le()?);
            Arg::Text(latin1(reader.counted(len)?))
        }
        ArgKind::Unicode1 => {
            let len = u64::from(reader.u8()?);
            Arg::Text(utf8_lossy(reader.counted(len)?))
        }
        ArgKind::Unicode4 => {
            let len = u64::from(reader.u32_le()?);
            Arg::Text(utf8_lossy(reader.counted(len)?))
        }
        ArgKind::Unicode8 => {
            let len = reader.u64_le()?;
            Arg::Text(utf8_lossy(reader.counted(len)?))
        }
        ArgKind::Bytes1 => {
            let len = u64::from(reader.u8()?);
            Arg::Data(reader.counted(len)?.to_vec())
        }
        ArgKind::Bytes4 => {
            let len = u64::from(reader.u32_le()?);
            Arg::Data(reader.counted(len)?.to_vec())
        }
        ArgKind::Bytes8 => {
            let len = reader.u64_le()?;
            Arg::Data(reader.counted(len)?.to_vec())
        }
        ArgKind::Long1 => {
            let len = u64::from(reader.u8()?);
            decode_long(reader.counted(len)?)
        }
        ArgKind::Long4 => {
            let len = u64::from(reader.u32_le()?);
            decode_long(reader.counted(len)?)
        }
    };
    Ok(arg)
}

/// Little-endian two's-complement long. Values wider than 8 bytes are kept
/// only by width; the decoder refuses them rather than approximating.
fn decode_long(raw: &[u8]) -> Arg {
    if raw.is_empty() {
        return Arg::Int(0);
    }
    if raw.len() > 8 {
        return Arg::WideLong(raw.len());
    }
    let negative = raw[raw.len() - 1] & 0x80 != 0;
    let fill = if negative { 0xff } else { 0x00 };
    let mut buf = [fill; 8];
    buf[..raw.len()].copy_from_slice(raw);
    Arg::Int(i64::from_le_bytes(buf))
}

/// Protocol 0 STRING arguments are repr-quoted.
fn strip_string_quotes(raw: &str, offset: usize) -> Result<String, PickleError> {
    let trimmed = raw.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return Ok(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    Err(PickleError::Malformed {
        what: "STRING",
        offset,
    })
}

struct RawOp {
    offset: usize,
    mnemonic: &'static str,
    arg: Arg,
}

fn read_op(reader: &mut Reader<'_>) -> Result<RawOp, PickleError> {
    let offset = reader.pos;
    let byte = reader.u8()?;
    let (mnemonic, kind) =
        opcode_info(byte).ok_or(PickleError::UnknownOpcode { byte, offset })?;
    let arg = read_arg(reader, kind, offset)?;
    Ok(RawOp {
        offset,
        mnemonic,
        arg,
    })
}

/// List the primitive operation sequence of a pickle stream, up to and
/// including the first STOP.
pub fn disassemble(data: &[u8]) -> Result<Vec<Opcode>, PickleError> {
    let mut reader = Reader::new(data);
    let mut ops = Vec::new();
    loop {
        if reader.done() {
            return Err(PickleError::MissingStop);
        }
        let op = read_op(&mut reader)?;
        let stop = op.mnemonic == "STOP";
        ops.push(Opcode {
            offset: op.offset,
            mnemonic: op.mnemonic,
            arg: op.arg.display(),
        });
        if stop {
            return Ok(ops);
        }
    }
}

/// Sentinel for MARK positions on the decoder stack.
enum Slot {
    Mark,
    Value(Value),
}

struct Decoder {
    stack: Vec<Slot>,
    memo: HashMap<u32, Value>,
    items: usize,
}

impl Decoder {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            memo: HashMap::new(),
            items: 0,
        }
    }

    fn push(&mut self, value: Value) -> Result<(), PickleError> {
        self.items += 1;
        if self.items > MAX_ITEMS {
            return Err(PickleError::LimitExceeded("too many values"));
        }
        self.stack.push(Slot::Value(value));
        Ok(())
    }

    fn pop(&mut self, offset: usize) -> Result<Value, PickleError> {
        match self.stack.pop() {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Mark) => Err(PickleError::MissingMark(offset)),
            None => Err(PickleError::StackUnderflow(offset)),
        }
    }

    fn top_mut(&mut self, offset: usize) -> Result<&mut Value, PickleError> {
        match self.stack.last_mut() {
            Some(Slot::Value(value)) => Ok(value),
            _ => Err(PickleError::StackUnderflow(offset)),
        }
    }

    /// Pop everything above the topmost MARK, in push order.
    fn pop_to_mark(&mut self, offset: usize) -> Result<Vec<Value>, PickleError> {
        let mut items = Vec::new();
        loop {
            match self.stack.pop() {
                Some(Slot::Mark) => {
                    items.reverse();
                    return Ok(items);
                }
                Some(Slot::Value(value)) => items.push(value),
                None => return Err(PickleError::MissingMark(offset)),
            }
        }
    }

    fn memo_store(&mut self, key: u32, offset: usize) -> Result<(), PickleError> {
        let value = match self.stack.last() {
            Some(Slot::Value(value)) => value.clone(),
            _ => return Err(PickleError::StackUnderflow(offset)),
        };
        self.memo.insert(key, value);
        Ok(())
    }
}

fn pairs(mut flat: Vec<Value>, offset: usize) -> Result<Vec<(Value, Value)>, PickleError> {
    if flat.len() % 2 != 0 {
        return Err(PickleError::Malformed {
            what: "key/value run",
            offset,
        });
    }
    let mut entries = Vec::with_capacity(flat.len() / 2);
    let mut drain = flat.drain(..);
    while let (Some(key), Some(value)) = (drain.next(), drain.next()) {
        entries.push((key, value));
    }
    Ok(entries)
}

/// Decode a pickle stream into a literal value.
///
/// Streams that reference importable callables or the persistent-id /
/// extension machinery return [`PickleError::Unsupported`]; nothing is ever
/// executed on behalf of the artifact.
pub fn decode(data: &[u8]) -> Result<Value, PickleError> {
    let mut reader = Reader::new(data);
    let mut state = Decoder::new();

    loop {
        if reader.done() {
            return Err(PickleError::MissingStop);
        }
        let op = read_op(&mut reader)?;
        let offset = op.offset;
        match op.mnemonic {
            "PROTO" | "FRAME" => {}
            "STOP" => return state.pop(offset),
            "MARK" => state.stack.push(Slot::Mark),
            "POP" => {
                if state.stack.pop().is_none() {
                    return Err(PickleError::StackUnderflow(offset));
                }
            }
            "POP_MARK" => {
                state.pop_to_mark(offset)?;
            }
            "DUP" => {
                let top = match state.stack.last() {
                    Some(Slot::Value(value)) => value.clone(),
                    _ => return Err(PickleError::StackUnderflow(offset)),
                };
                state.push(top)?;
            }
            "NONE" => state.push(Value::None)?,
            "NEWTRUE" => state.push(Value::Bool(true))?,
            "NEWFALSE" => state.push(Value::Bool(false))?,
            "INT" => {
                let raw = match op.arg {
                    Arg::Text(text) => text,
                    _ => unreachable!("INT carries a line argument"),
                };
                // Protocol 0 encodes booleans as the special lines 00 / 01.
                let value = match raw.trim() {
                    "00" => Value::Bool(false),
                    "01" => Value::Bool(true),
                    text => Value::Int(text.parse::<i64>().map_err(|_| {
                        PickleError::Malformed {
                            what: "INT",
                            offset,
                        }
                    })?),
                };
                state.push(value)?;
            }
            "LONG" => {
                let raw = match op.arg {
                    Arg::Text(text) => text,
                    _ => unreachable!("LONG carries a line argument"),
                };
                let trimmed = raw.trim().trim_end_matches(['L', 'l']);
                let value = trimmed.parse::<i64>().map_err(|_| PickleError::Malformed {
                    what: "LONG",
                    offset,
                })?;
                state.push(Value::Int(value))?;
            }
            "BININT" | "BININT1" | "BININT2" | "LONG1" | "LONG4" => {
                let value = match op.arg {
                    Arg::Int(v) => v,
                    Arg::Uint(v) => v as i64,
                    Arg::WideLong(_) => {
                        return Err(PickleError::LimitExceeded("integer wider than 8 bytes"))
                    }
                    _ => unreachable!("integer opcodes carry numeric arguments"),
                };
                state.push(Value::Int(value))?;
            }
            "FLOAT" => {
                let raw = match op.arg {
                    Arg::Text(text) => text,
                    _ => unreachable!("FLOAT carries a line argument"),
                };
                let value = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| PickleError::Malformed {
                        what: "FLOAT",
                        offset,
                    })?;
                state.push(Value::Float(value))?;
            }
            "BINFLOAT" => {
                let value = match op.arg {
                    Arg::Float(v) => v,
                    _ => unreachable!("BINFLOAT carries an f64 argument"),
                };
                state.push(Value::Float(value))?;
            }
            "STRING" | "BINSTRING" | "SHORT_BINSTRING" | "UNICODE" | "BINUNICODE"
            | "SHORT_BINUNICODE" | "BINUNICODE8" => {
                let text = match op.arg {
                    Arg::Text(text) => text,
                    _ => unreachable!("string opcodes carry text arguments"),
                };
                state.push(Value::Str(text))?;
            }
            "BINBYTES" | "SHORT_BINBYTES" | "BINBYTES8" | "BYTEARRAY8" => {
                let data = match op.arg {
                    Arg::Data(data) => data,
                    _ => unreachable!("bytes opcodes carry data arguments"),
                };
                state.push(Value::Bytes(data))?;
            }
            "EMPTY_LIST" => state.push(Value::List(Vec::new()))?,
            "EMPTY_TUPLE" => state.push(Value::Tuple(Vec::new()))?,
            "EMPTY_DICT" => state.push(Value::Dict(Vec::new()))?,
            "EMPTY_SET" => state.push(Value::Set(Vec::new()))?,
            "LIST" => {
                let items = state.pop_to_mark(offset)?;
                state.push(Value::List(items))?;
            }
            "TUPLE" => {
                let items = state.pop_to_mark(offset)?;
                state.push(Value::Tuple(items))?;
            }
            "TUPLE1" => {
                let a = state.pop(offset)?;
                state.push(Value::Tuple(vec![a]))?;
            }
            "TUPLE2" => {
                let b = state.pop(offset)?;
                let a = state.pop(offset)?;
                state.push(Value::Tuple(vec![a, b]))?;
            }
            "TUPLE3" => {
                let c = state.pop(offset)?;
                let b = state.pop(offset)?;
                let a = state.pop(offset)?;
                state.push(Value::Tuple(vec![a, b, c]))?;
            }
            "FROZENSET" => {
                let items = state.pop_to_mark(offset)?;
                state.push(Value::Set(items))?;
            }
            "DICT" => {
                let flat = state.pop_to_mark(offset)?;
                let entries = pairs(flat, offset)?;
                state.push(Value::Dict(entries))?;
            }
            "APPEND" => {
                let item = state.pop(offset)?;
                match state.top_mut(offset)? {
                    Value::List(items) => items.push(item),
                    _ => {
                        return Err(PickleError::Malformed {
                            what: "APPEND target",
                            offset,
                        })
                    }
                }
            }
            "APPENDS" => {
                let run = state.pop_to_mark(offset)?;
                match state.top_mut(offset)? {
                    Value::List(items) => items.extend(run),
                    _ => {
                        return Err(PickleError::Malformed {
                            what: "APPENDS target",
                            offset,
                        })
                    }
                }
            }
            "ADDITEMS" => {
                let run = state.pop_to_mark(offset)?;
                match state.top_mut(offset)? {
                    Value::Set(items) => items.extend(run),
                    _ => {
                        return Err(PickleError::Malformed {
                            what: "ADDITEMS target",
                            offset,
                        })
                    }
                }
            }
            "SETITEM" => {
                let value = state.pop(offset)?;
                let key = state.pop(offset)?;
                match state.top_mut(offset)? {
                    Value::Dict(entries) => entries.push((key, value)),
                    _ => {
                        return Err(PickleError::Malformed {
                            what: "SETITEM target",
                            offset,
                        })
                    }
                }
            }
            "SETITEMS" => {
                let flat = state.pop_to_mark(offset)?;
                let run = pairs(flat, offset)?;
                match state.top_mut(offset)? {
                    Value::Dict(entries) => entries.extend(run),
                    _ => {
                        return Err(PickleError::Malformed {
                            what: "SETITEMS target",
                            offset,
                        })
                    }
                }
            }
            "PUT" => {
                let key = match op.arg {
                    Arg::Text(text) => {
                        text.trim()
                            .parse::<u32>()
                            .map_err(|_| PickleError::Malformed {
                                what: "PUT",
                                offset,
                            })?
                    }
                    _ => unreachable!("PUT carries a line argument"),
                };
                state.memo_store(key, offset)?;
            }
            "BINPUT" | "LONG_BINPUT" => {
                let key = match op.arg {
                    Arg::Uint(v) => v as u32,
                    _ => unreachable!("memo opcodes carry numeric arguments"),
                };
                state.memo_store(key, offset)?;
            }
            "MEMOIZE" => {
                let key = state.memo.len() as u32;
                state.memo_store(key, offset)?;
            }
            "GET" => {
                let key = match op.arg {
                    Arg::Text(text) => {
                        text.trim()
                            .parse::<u32>()
                            .map_err(|_| PickleError::Malformed {
                                what: "GET",
                                offset,
                            })?
                    }
                    _ => unreachable!("GET carries a line argument"),
                };
                let value = state
                    .memo
                    .get(&key)
                    .cloned()
                    .ok_or(PickleError::MemoMiss(key))?;
                state.push(value)?;
            }
            "BINGET" | "LONG_BINGET" => {
                let key = match op.arg {
                    Arg::Uint(v) => v as u32,
                    _ => unreachable!("memo opcodes carry numeric arguments"),
                };
                let value = state
                    .memo
                    .get(&key)
                    .cloned()
                    .ok_or(PickleError::MemoMiss(key))?;
                state.push(value)?;
            }
            // Everything below constructs or invokes host objects.
            "GLOBAL" => return Err(PickleError::Unsupported("GLOBAL")),
            "STACK_GLOBAL" => return Err(PickleError::Unsupported("STACK_GLOBAL")),
            "REDUCE" => return Err(PickleError::Unsupported("REDUCE")),
            "BUILD" => return Err(PickleError::Unsupported("BUILD")),
            "INST" => return Err(PickleError::Unsupported("INST")),
            "OBJ" => return Err(PickleError::Unsupported("OBJ")),
            "NEWOBJ" => return Err(PickleError::Unsupported("NEWOBJ")),
            "NEWOBJ_EX" => return Err(PickleError::Unsupported("NEWOBJ_EX")),
            "PERSID" => return Err(PickleError::Unsupported("PERSID")),
            "BINPERSID" => return Err(PickleError::Unsupported("BINPERSID")),
            "EXT1" => return Err(PickleError::Unsupported("EXT1")),
            "EXT2" => return Err(PickleError::Unsupported("EXT2")),
            "EXT4" => return Err(PickleError::Unsupported("EXT4")),
            "NEXT_BUFFER" => return Err(PickleError::Unsupported("NEXT_BUFFER")),
            "READONLY_BUFFER" => return Err(PickleError::Unsupported("READONLY_BUFFER")),
            other => {
                debug_assert!(false, "unhandled mnemonic {other}");
                return Err(PickleError::Unsupported("UNKNOWN"));
            }
        }
    }
}
