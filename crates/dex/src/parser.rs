//! Dex container parser.
//!
//! Reads the header, every id table, class definitions with their class
//! data and code items, and the map list. Indices inside class data are
//! diff-encoded on disk and converted to absolute ids here.

use log::debug;

use crate::error::DexError;
use crate::model::{
    ClassData, ClassDef, CodeItem, DexFile, EncodedField, EncodedMethod, FieldId, Header, MapItem,
    MethodId, ProtoId, ENDIAN_CONSTANT,
};
use crate::mutf8;
use crate::reader::Reader;

/// Parse a complete dex file.
pub fn parse(data: &[u8]) -> Result<DexFile, DexError> {
    let header = parse_header(data)?;
    debug!(
        "dex v{}: {} strings, {} types, {} methods, {} classes",
        header.version(),
        header.string_ids_size,
        header.type_ids_size,
        header.method_ids_size,
        header.class_defs_size
    );

    let strings = table(data, header.string_ids_off, header.string_ids_size, 4, |r| {
        let offset = r.u32()? as usize;
        let mut s = Reader::at(data, offset);
        s.uleb128()?;
        mutf8::decode(data, s.position())
    })?;

    let type_ids = table(data, header.type_ids_off, header.type_ids_size, 4, |r| r.u32())?;

    let protos = table(data, header.proto_ids_off, header.proto_ids_size, 12, |r| {
        let shorty_idx = r.u32()?;
        let return_type_idx = r.u32()?;
        let parameters = type_list(data, r.u32()?)?;
        Ok(ProtoId {
            shorty_idx,
            return_type_idx,
            parameters,
        })
    })?;

    let fields = table(data, header.field_ids_off, header.field_ids_size, 8, |r| {
        Ok(FieldId {
            class_idx: r.u16()?,
            type_idx: r.u16()?,
            name_idx: r.u32()?,
        })
    })?;

    let methods = table(data, header.method_ids_off, header.method_ids_size, 8, |r| {
        Ok(MethodId {
            class_idx: r.u16()?,
            proto_idx: r.u16()?,
            name_idx: r.u32()?,
        })
    })?;

    let class_defs = table(data, header.class_defs_off, header.class_defs_size, 32, |r| {
        let class_idx = r.u32()?;
        let access_flags = r.u32()?;
        let superclass_idx = r.u32()?;
        let interfaces = type_list(data, r.u32()?)?;
        let source_file_idx = r.u32()?;
        let _annotations_off = r.u32()?;
        let class_data = class_data(data, r.u32()?)?;
        let _static_values_off = r.u32()?;
        Ok(ClassDef {
            class_idx,
            access_flags,
            superclass_idx,
            interfaces,
            source_file_idx,
            class_data,
        })
    })?;

    let map = map_list(data, header.map_off)?;

    Ok(DexFile {
        header,
        strings,
        type_ids,
        protos,
        fields,
        methods,
        class_defs,
        map,
    })
}

/// Parse and validate the fixed header.
pub fn parse_header(data: &[u8]) -> Result<Header, DexError> {
    let mut r = Reader::at(data, 0);
    let mut magic = [0u8; 8];
    magic.copy_from_slice(r.bytes(8)?);
    if &magic[..4] != b"dex\n" || magic[7] != 0 {
        return Err(DexError::BadMagic(magic));
    }
    let checksum = r.u32()?;
    let mut signature = [0u8; 20];
    signature.copy_from_slice(r.bytes(20)?);
    let file_size = r.u32()?;
    let header_size = r.u32()?;
    let endian_tag = r.u32()?;
    if endian_tag != ENDIAN_CONSTANT {
        return Err(DexError::BadEndianTag(endian_tag));
    }

    Ok(Header {
        magic,
        checksum,
        signature,
        file_size,
        header_size,
        endian_tag,
        link_size: r.u32()?,
        link_off: r.u32()?,
        map_off: r.u32()?,
        string_ids_size: r.u32()?,
        string_ids_off: r.u32()?,
        type_ids_size: r.u32()?,
        type_ids_off: r.u32()?,
        proto_ids_size: r.u32()?,
        proto_ids_off: r.u32()?,
        field_ids_size: r.u32()?,
        field_ids_off: r.u32()?,
        method_ids_size: r.u32()?,
        method_ids_off: r.u32()?,
        class_defs_size: r.u32()?,
        class_defs_off: r.u32()?,
        data_size: r.u32()?,
        data_off: r.u32()?,
    })
}

/// Read `count` fixed-size records starting at `offset`.
fn table<'a, T>(
    data: &'a [u8],
    offset: u32,
    count: u32,
    stride: usize,
    mut read: impl FnMut(&mut Reader<'a>) -> Result<T, DexError>,
) -> Result<Vec<T>, DexError> {
    let mut items = Vec::with_capacity(count.min(0x1_0000) as usize);
    for i in 0..count as usize {
        let mut r = Reader::at(data, offset as usize + i * stride);
        items.push(read(&mut r)?);
    }
    Ok(items)
}

fn type_list(data: &[u8], offset: u32) -> Result<Vec<u32>, DexError> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let mut r = Reader::at(data, offset as usize);
    let size = r.u32()?;
    (0..size).map(|_| r.u16().map(u32::from)).collect()
}

fn class_data(data: &[u8], offset: u32) -> Result<ClassData, DexError> {
    if offset == 0 {
        return Ok(ClassData::default());
    }
    let mut r = Reader::at(data, offset as usize);
    let static_fields_size = r.uleb128()?;
    let instance_fields_size = r.uleb128()?;
    let direct_methods_size = r.uleb128()?;
    let virtual_methods_size = r.uleb128()?;

    Ok(ClassData {
        static_fields: encoded_fields(&mut r, static_fields_size)?,
        instance_fields: encoded_fields(&mut r, instance_fields_size)?,
        direct_methods: encoded_methods(data, &mut r, direct_methods_size)?,
        virtual_methods: encoded_methods(data, &mut r, virtual_methods_size)?,
    })
}

fn encoded_fields(r: &mut Reader<'_>, count: u32) -> Result<Vec<EncodedField>, DexError> {
    let mut field_idx = 0u32;
    let mut fields = Vec::new();
    for _ in 0..count {
        field_idx = field_idx.wrapping_add(r.uleb128()?);
        fields.push(EncodedField {
            field_idx,
            access_flags: r.uleb128()?,
        });
    }
    Ok(fields)
}

fn encoded_methods(
    data: &[u8],
    r: &mut Reader<'_>,
    count: u32,
) -> Result<Vec<EncodedMethod>, DexError> {
    let mut method_idx = 0u32;
    let mut methods = Vec::new();
    for _ in 0..count {
        method_idx = method_idx.wrapping_add(r.uleb128()?);
        let access_flags = r.uleb128()?;
        let code_off = r.uleb128()?;
        let code = if code_off == 0 {
            None
        } else {
            Some(code_item(data, code_off)?)
        };
        methods.push(EncodedMethod {
            method_idx,
            access_flags,
            code,
        });
    }
    Ok(methods)
}

fn code_item(data: &[u8], offset: u32) -> Result<CodeItem, DexError> {
    let mut r = Reader::at(data, offset as usize);
    let registers_size = r.u16()?;
    let ins_size = r.u16()?;
    let outs_size = r.u16()?;
    let tries_size = r.u16()?;
    let debug_info_off = r.u32()?;
    let insns_size = r.u32()? as usize;
    let insns = r.bytes(insns_size * 2)?.to_vec();
    Ok(CodeItem {
        registers_size,
        ins_size,
        outs_size,
        tries_size,
        debug_info_off,
        insns,
    })
}

fn map_list(data: &[u8], offset: u32) -> Result<Vec<MapItem>, DexError> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let size = Reader::at(data, offset as usize).u32()?;
    table(data, offset.saturating_add(4), size, 12, |r| {
        let kind = r.u16()?;
        let _unused = r.u16()?;
        Ok(MapItem {
            kind,
            size: r.u32()?,
            offset: r.u32()?,
        })
    })
}
