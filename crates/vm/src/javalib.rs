//! Emulation of the handful of `java.lang` and `java.io` members that
//! simple programs call.
//!
//! Strings are indexed in UTF-16 code units, as Java does.

use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use rand_core::{OsRng, RngCore};

use crate::error::{Fault, RuntimeError};
use crate::heap::{HeapObject, NativeState};
use crate::library::{NativeCall, NativeContext, NativeLibrary};

const STRING: &str = "Ljava/lang/String;";
const STRING_BUILDER: &str = "Ljava/lang/StringBuilder;";
const PRINT_STREAM: &str = "Ljava/io/PrintStream;";
const BUFFERED_READER: &str = "Ljava/io/BufferedReader;";
const INPUT_STREAM_READER: &str = "Ljava/io/InputStreamReader;";
const LONG: &str = "Ljava/lang/Long;";
const MATH: &str = "Ljava/lang/Math;";
const SYSTEM: &str = "Ljava/lang/System;";
const INTEGER: &str = "Ljava/lang/Integer;";
const REFLECT_ARRAY: &str = "Ljava/lang/reflect/Array;";

/// Parse a decimal like C's `atoll`: optional leading whitespace, an
/// optional sign, then digits up to the first non-digit. Overflow wraps.
pub fn parse_long(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.wrapping_mul(10).wrapping_add(i64::from(d - b'0'))
        });
    if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    }
}

/// Java's `String.compareTo` as the interpreter defines it: lengths first,
/// then the first differing code unit.
pub fn compare_strings(left: &str, right: &str) -> i32 {
    let left: Vec<u16> = left.encode_utf16().collect();
    let right: Vec<u16> = right.encode_utf16().collect();
    if left.len() != right.len() {
        return left.len() as i32 - right.len() as i32;
    }
    left.iter()
        .zip(&right)
        .find(|(l, r)| l != r)
        .map_or(0, |(l, r)| i32::from(*l) - i32::from(*r))
}

fn utf16_char(unit: u16) -> char {
    char::decode_utf16([unit])
        .next()
        .and_then(Result::ok)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// The default library: console I/O plus a few `java.lang` classes.
pub struct JavaLang {
    out: Box<dyn Write>,
    input: Box<dyn BufRead>,
    rng: Box<dyn RngCore>,
}

impl JavaLang {
    pub fn new(out: Box<dyn Write>, input: Box<dyn BufRead>) -> Self {
        Self {
            out,
            input,
            rng: Box::new(OsRng),
        }
    }

    /// Library bound to the process's stdout and stdin.
    pub fn stdio() -> Self {
        Self::new(
            Box::new(io::stdout()),
            Box::new(io::BufReader::new(io::stdin())),
        )
    }

    pub fn with_rng(mut self, rng: Box<dyn RngCore>) -> Self {
        self.rng = rng;
        self
    }

    /// Text of argument `n` rendered the way `print` shows a `kind` value.
    /// Unknown kinds render as `None`.
    fn render(
        ctx: &NativeContext<'_, '_>,
        call: &NativeCall<'_>,
        n: usize,
        kind: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let text = match kind {
            STRING => ctx
                .string(call.arg(n))?
                .unwrap_or_else(|| "null".to_string()),
            "I" => ctx.int(call.arg(n))?.to_string(),
            "C" => utf16_char(ctx.int(call.arg(n))? as u16).to_string(),
            "Z" => (ctx.int(call.arg(n))? != 0).to_string(),
            "J" => ctx.long(call.arg(n), call.arg(n + 1))?.to_string(),
            _ => return Ok(None),
        };
        Ok(Some(text))
    }

    fn print(
        &mut self,
        ctx: &NativeContext<'_, '_>,
        call: &NativeCall<'_>,
        newline: bool,
    ) -> Result<(), RuntimeError> {
        let text = match call.param_type {
            Some(kind) => match Self::render(ctx, call, 1, kind)? {
                Some(text) => text,
                None => return Ok(()),
            },
            None => String::new(),
        };
        let written = if newline {
            writeln!(self.out, "{text}")
        } else {
            write!(self.out, "{text}")
        };
        written
            .and_then(|()| self.out.flush())
            .map_err(|e| RuntimeError::Io {
                at: ctx.pc,
                message: e.to_string(),
            })
    }

    fn read_line(&mut self, ctx: &mut NativeContext<'_, '_>) -> Result<(), RuntimeError> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .map_err(|e| RuntimeError::Io {
                at: ctx.pc,
                message: e.to_string(),
            })?;
        if read == 0 {
            ctx.result.set_ref(0);
            return Ok(());
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        let reference = ctx.heap.alloc_string(line);
        ctx.result.set_ref(reference);
        Ok(())
    }

    // ---- String ----

    fn char_at(ctx: &mut NativeContext<'_, '_>, call: &NativeCall<'_>) -> Result<(), RuntimeError> {
        let text = ctx.string(call.arg(0))?.ok_or(RuntimeError::NullReference { at: ctx.pc })?;
        let index = ctx.int(call.arg(1))?;
        let units: Vec<u16> = text.encode_utf16().collect();
        match usize::try_from(index).ok().and_then(|i| units.get(i)) {
            Some(&unit) => ctx.result.set_int(i32::from(unit)),
            None => {
                ctx.fault(Fault::StringIndexOutOfBounds {
                    at: ctx.pc,
                    index,
                    length: units.len(),
                });
                ctx.result.set_int(0);
            }
        }
        Ok(())
    }

    fn compare_to(
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<(), RuntimeError> {
        let null = RuntimeError::NullReference { at: ctx.pc };
        let left = ctx.string(call.arg(0))?.ok_or_else(|| null.clone())?;
        let right = ctx.string(call.arg(1))?.ok_or(null)?;
        ctx.result.set_int(compare_strings(&left, &right));
        Ok(())
    }

    // ---- StringBuilder ----

    fn builder_init(
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<(), RuntimeError> {
        let initial = match call.param_type {
            Some(STRING) => ctx.string(call.arg(1))?.unwrap_or_else(|| "null".to_string()),
            _ => String::new(),
        };
        let receiver = ctx.reference(call.arg(0))?;
        ctx.heap.instance_mut(ctx.pc, receiver)?.native = Some(NativeState::StringBuilder(initial));
        Ok(())
    }

    fn builder_append(
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<(), RuntimeError> {
        let receiver = ctx.reference(call.arg(0))?;
        let kind = call.param_type.unwrap_or_default();
        let Some(text) = Self::render(ctx, call, 1, kind)? else {
            ctx.result.set_ref(receiver);
            return Ok(());
        };
        let instance = ctx.heap.instance_mut(ctx.pc, receiver)?;
        match &mut instance.native {
            Some(NativeState::StringBuilder(buffer)) => buffer.push_str(&text),
            native => *native = Some(NativeState::StringBuilder(text)),
        }
        ctx.result.set_ref(receiver);
        Ok(())
    }

    fn builder_to_string(
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<(), RuntimeError> {
        let receiver = ctx.reference(call.arg(0))?;
        let text = match &ctx.heap.instance(ctx.pc, receiver)?.native {
            Some(NativeState::StringBuilder(buffer)) => buffer.clone(),
            _ => String::new(),
        };
        let reference = ctx.heap.alloc_string(text);
        ctx.result.set_ref(reference);
        Ok(())
    }

    // ---- Long ----

    fn long_value_of(
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<(), RuntimeError> {
        let value = match call.param_type {
            Some("J") => ctx.long(call.arg(0), call.arg(1))?,
            _ => {
                let text = ctx
                    .string(call.arg(0))?
                    .ok_or(RuntimeError::NullReference { at: ctx.pc })?;
                parse_long(&text)
            }
        };
        let boxed = ctx.new_instance(LONG);
        ctx.heap.instance_mut(ctx.pc, boxed)?.native = Some(NativeState::Long(value));
        ctx.result.set_ref(boxed);
        Ok(())
    }

    fn long_value(ctx: &mut NativeContext<'_, '_>, call: &NativeCall<'_>) -> Result<(), RuntimeError> {
        let receiver = ctx.reference(call.arg(0))?;
        match ctx.heap.instance(ctx.pc, receiver)?.native {
            Some(NativeState::Long(value)) => {
                ctx.result.set_long(value);
                Ok(())
            }
            _ => Err(RuntimeError::InvalidReference {
                at: ctx.pc,
                reference: receiver,
                expected: "a java.lang.Long",
            }),
        }
    }

    // ---- reflect.Array ----

    /// `Array.newInstance(Class, int[])`: a nested array with one level per
    /// dimension.
    fn new_instance(
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<(), RuntimeError> {
        let mirror = ctx.reference(call.arg(0))?;
        let component = ctx.heap.mirror(ctx.pc, mirror)?.to_string();
        let dims_ref = ctx.reference(call.arg(1))?;
        let dims_array = ctx.heap.array(ctx.pc, dims_ref)?;
        let dims: Vec<i32> = (0..dims_array.length as usize)
            .filter_map(|i| dims_array.int(i))
            .collect();
        let reference = Self::build_array(ctx, &component, &dims)?;
        ctx.result.set_ref(reference);
        Ok(())
    }

    fn build_array(
        ctx: &mut NativeContext<'_, '_>,
        component: &str,
        dims: &[i32],
    ) -> Result<u32, RuntimeError> {
        let descriptor = format!("{}{component}", "[".repeat(dims.len()));
        let Some((&count, rest)) = dims.split_first() else {
            return Ok(0);
        };
        let outer = ctx.new_array(&descriptor, count)?;
        if rest.is_empty() {
            return Ok(outer);
        }
        for i in 0..count as usize {
            let inner = Self::build_array(ctx, component, rest)?;
            if let Some(HeapObject::Array(array)) = ctx.heap.get_mut(outer) {
                array.slots[i] = inner.to_le_bytes();
            }
        }
        Ok(outer)
    }
}

impl NativeLibrary for JavaLang {
    fn try_dispatch(
        &mut self,
        ctx: &mut NativeContext<'_, '_>,
        call: &NativeCall<'_>,
    ) -> Result<bool, RuntimeError> {
        match (call.class, call.method) {
            (PRINT_STREAM, "println") => self.print(ctx, call, true)?,
            (PRINT_STREAM, "print") => self.print(ctx, call, false)?,
            (INPUT_STREAM_READER, "<init>") | (BUFFERED_READER, "<init>") => {}
            (BUFFERED_READER, "readLine") => self.read_line(ctx)?,
            (MATH, "random") => {
                let value = (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
                ctx.result.set_double(value);
            }
            (SYSTEM, "currentTimeMillis") => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_millis() as i64);
                ctx.result.set_long(millis);
            }
            (STRING, "charAt") => Self::char_at(ctx, call)?,
            (STRING, "compareTo") => Self::compare_to(ctx, call)?,
            (STRING, "length") => {
                let text = ctx
                    .string(call.arg(0))?
                    .ok_or(RuntimeError::NullReference { at: ctx.pc })?;
                ctx.result.set_int(text.encode_utf16().count() as i32);
            }
            (STRING_BUILDER, "<init>") => Self::builder_init(ctx, call)?,
            (STRING_BUILDER, "append") => Self::builder_append(ctx, call)?,
            (STRING_BUILDER, "toString") => Self::builder_to_string(ctx, call)?,
            (LONG, "valueOf") => Self::long_value_of(ctx, call)?,
            (LONG, "longValue") => Self::long_value(ctx, call)?,
            (REFLECT_ARRAY, "newInstance") => Self::new_instance(ctx, call)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn static_field(
        &mut self,
        ctx: &mut NativeContext<'_, '_>,
        class: &str,
        field: &str,
    ) -> Result<Option<u32>, RuntimeError> {
        let reference = match (class, field) {
            (SYSTEM, "out") => ctx.new_instance(PRINT_STREAM),
            (SYSTEM, "in") => ctx.new_instance("Ljava/io/InputStream;"),
            (INTEGER, "TYPE") => ctx.heap.class_mirror("I"),
            _ => return Ok(None),
        };
        Ok(Some(reference))
    }
}
