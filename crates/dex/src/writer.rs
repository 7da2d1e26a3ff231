//! Serializes a [`DexFile`] into a well-formed container.
//!
//! Layout: header, id tables, then one data section holding type lists,
//! code items, string data, class data and finally the map list. The
//! header stored in the model is ignored and regenerated from the layout.

use crate::model::{
    ClassData, DexFile, EncodedMethod, Header, MapItem, DEX_MAGIC, ENDIAN_CONSTANT, HEADER_SIZE,
};
use crate::mutf8;

const TYPE_HEADER_ITEM: u16 = 0x0000;
const TYPE_STRING_ID_ITEM: u16 = 0x0001;
const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
const TYPE_MAP_LIST: u16 = 0x1000;
const TYPE_TYPE_LIST: u16 = 0x1001;
const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
const TYPE_CODE_ITEM: u16 = 0x2001;
const TYPE_STRING_DATA_ITEM: u16 = 0x2002;

/// Bytes of an encoded file together with the header and map that
/// describe them.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub header: Header,
    pub map: Vec<MapItem>,
}

/// Append an unsigned LEB128 value.
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Adler-32 as used for the header checksum.
pub fn adler32(bytes: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let (mut a, mut b) = (1u32, 0u32);
    for chunk in bytes.chunks(5552) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Running data section. Offsets are absolute file offsets.
struct Data {
    base: u32,
    bytes: Vec<u8>,
    map: Vec<MapItem>,
}

impl Data {
    fn offset(&self) -> u32 {
        self.base + self.bytes.len() as u32
    }

    /// Start a new section of `kind`; `size` is patched by `finish`.
    fn begin(&mut self, kind: u16, align: bool) {
        if align {
            align4(&mut self.bytes);
        }
        let offset = self.offset();
        self.map.push(MapItem {
            kind,
            size: 0,
            offset,
        });
    }

    fn finish(&mut self, size: u32) {
        if size == 0 {
            self.map.pop();
        } else if let Some(item) = self.map.last_mut() {
            item.size = size;
        }
    }

    fn type_list(&mut self, types: &[u32]) -> u32 {
        if types.is_empty() {
            return 0;
        }
        align4(&mut self.bytes);
        let offset = self.offset();
        put_u32(&mut self.bytes, types.len() as u32);
        for &t in types {
            put_u16(&mut self.bytes, t as u16);
        }
        offset
    }
}

/// Encode `dex` into bytes.
pub fn encode(dex: &DexFile) -> Encoded {
    let string_ids_off = HEADER_SIZE;
    let type_ids_off = string_ids_off + 4 * dex.strings.len() as u32;
    let proto_ids_off = type_ids_off + 4 * dex.type_ids.len() as u32;
    let field_ids_off = proto_ids_off + 12 * dex.protos.len() as u32;
    let method_ids_off = field_ids_off + 8 * dex.fields.len() as u32;
    let class_defs_off = method_ids_off + 8 * dex.methods.len() as u32;
    let data_off = class_defs_off + 32 * dex.class_defs.len() as u32;

    let mut data = Data {
        base: data_off,
        bytes: Vec::new(),
        map: Vec::new(),
    };

    // Type lists: proto parameters, then class interfaces.
    data.begin(TYPE_TYPE_LIST, true);
    let mut lists = 0;
    let proto_params: Vec<u32> = dex
        .protos
        .iter()
        .map(|p| {
            lists += u32::from(!p.parameters.is_empty());
            data.type_list(&p.parameters)
        })
        .collect();
    let interfaces: Vec<u32> = dex
        .class_defs
        .iter()
        .map(|c| {
            lists += u32::from(!c.interfaces.is_empty());
            data.type_list(&c.interfaces)
        })
        .collect();
    data.finish(lists);

    // Code items, in class/method order.
    data.begin(TYPE_CODE_ITEM, true);
    let mut code_count = 0;
    let code_offsets: Vec<Vec<u32>> = dex
        .class_defs
        .iter()
        .map(|c| {
            all_methods(&c.class_data)
                .map(|m| match &m.code {
                    None => 0,
                    Some(code) => {
                        align4(&mut data.bytes);
                        code_count += 1;
                        let offset = data.offset();
                        let out = &mut data.bytes;
                        put_u16(out, code.registers_size);
                        put_u16(out, code.ins_size);
                        put_u16(out, code.outs_size);
                        put_u16(out, 0);
                        put_u32(out, 0);
                        put_u32(out, (code.insns.len() / 2) as u32);
                        out.extend_from_slice(&code.insns);
                        if code.insns.len() % 2 != 0 {
                            out.push(0);
                        }
                        offset
                    }
                })
                .collect()
        })
        .collect();
    data.finish(code_count);

    // String data.
    data.begin(TYPE_STRING_DATA_ITEM, false);
    let string_offsets: Vec<u32> = dex
        .strings
        .iter()
        .map(|s| {
            let offset = data.offset();
            let (encoded, units) = mutf8::encode(s);
            write_uleb128(&mut data.bytes, units);
            data.bytes.extend_from_slice(&encoded);
            data.bytes.push(0);
            offset
        })
        .collect();
    data.finish(dex.strings.len() as u32);

    // Class data.
    data.begin(TYPE_CLASS_DATA_ITEM, false);
    let mut class_data_count = 0;
    let class_data_offsets: Vec<u32> = dex
        .class_defs
        .iter()
        .zip(&code_offsets)
        .map(|(c, codes)| {
            if c.class_data.is_empty() {
                return 0;
            }
            class_data_count += 1;
            let offset = data.offset();
            write_class_data(&mut data.bytes, &c.class_data, codes);
            offset
        })
        .collect();
    data.finish(class_data_count);

    // Map list, which describes itself as the last item.
    align4(&mut data.bytes);
    let map_off = data.offset();
    let mut map = vec![MapItem {
        kind: TYPE_HEADER_ITEM,
        size: 1,
        offset: 0,
    }];
    let ids = [
        (TYPE_STRING_ID_ITEM, dex.strings.len(), string_ids_off),
        (TYPE_TYPE_ID_ITEM, dex.type_ids.len(), type_ids_off),
        (TYPE_PROTO_ID_ITEM, dex.protos.len(), proto_ids_off),
        (TYPE_FIELD_ID_ITEM, dex.fields.len(), field_ids_off),
        (TYPE_METHOD_ID_ITEM, dex.methods.len(), method_ids_off),
        (TYPE_CLASS_DEF_ITEM, dex.class_defs.len(), class_defs_off),
    ];
    for (kind, size, offset) in ids {
        if size > 0 {
            map.push(MapItem {
                kind,
                size: size as u32,
                offset,
            });
        }
    }
    map.extend(data.map.iter().copied());
    map.push(MapItem {
        kind: TYPE_MAP_LIST,
        size: 1,
        offset: map_off,
    });
    put_u32(&mut data.bytes, map.len() as u32);
    for item in &map {
        put_u16(&mut data.bytes, item.kind);
        put_u16(&mut data.bytes, 0);
        put_u32(&mut data.bytes, item.size);
        put_u32(&mut data.bytes, item.offset);
    }

    let file_size = data.offset();
    let mut header = Header {
        magic: DEX_MAGIC,
        checksum: 0,
        signature: [0; 20],
        file_size,
        header_size: HEADER_SIZE,
        endian_tag: ENDIAN_CONSTANT,
        link_size: 0,
        link_off: 0,
        map_off,
        string_ids_size: dex.strings.len() as u32,
        string_ids_off: nonzero_off(dex.strings.len(), string_ids_off),
        type_ids_size: dex.type_ids.len() as u32,
        type_ids_off: nonzero_off(dex.type_ids.len(), type_ids_off),
        proto_ids_size: dex.protos.len() as u32,
        proto_ids_off: nonzero_off(dex.protos.len(), proto_ids_off),
        field_ids_size: dex.fields.len() as u32,
        field_ids_off: nonzero_off(dex.fields.len(), field_ids_off),
        method_ids_size: dex.methods.len() as u32,
        method_ids_off: nonzero_off(dex.methods.len(), method_ids_off),
        class_defs_size: dex.class_defs.len() as u32,
        class_defs_off: nonzero_off(dex.class_defs.len(), class_defs_off),
        data_size: file_size - data_off,
        data_off,
    };

    let mut out = Vec::with_capacity(file_size as usize);
    write_header(&mut out, &header);
    for &offset in &string_offsets {
        put_u32(&mut out, offset);
    }
    for &descriptor in &dex.type_ids {
        put_u32(&mut out, descriptor);
    }
    for (proto, &params_off) in dex.protos.iter().zip(&proto_params) {
        put_u32(&mut out, proto.shorty_idx);
        put_u32(&mut out, proto.return_type_idx);
        put_u32(&mut out, params_off);
    }
    for field in &dex.fields {
        put_u16(&mut out, field.class_idx);
        put_u16(&mut out, field.type_idx);
        put_u32(&mut out, field.name_idx);
    }
    for method in &dex.methods {
        put_u16(&mut out, method.class_idx);
        put_u16(&mut out, method.proto_idx);
        put_u32(&mut out, method.name_idx);
    }
    for ((class, &interfaces_off), &class_data_off) in dex
        .class_defs
        .iter()
        .zip(&interfaces)
        .zip(&class_data_offsets)
    {
        put_u32(&mut out, class.class_idx);
        put_u32(&mut out, class.access_flags);
        put_u32(&mut out, class.superclass_idx);
        put_u32(&mut out, interfaces_off);
        put_u32(&mut out, class.source_file_idx);
        put_u32(&mut out, 0);
        put_u32(&mut out, class_data_off);
        put_u32(&mut out, 0);
    }
    out.extend_from_slice(&data.bytes);

    header.checksum = adler32(&out[12..]);
    out[8..12].copy_from_slice(&header.checksum.to_le_bytes());

    Encoded {
        bytes: out,
        header,
        map,
    }
}

fn nonzero_off(count: usize, offset: u32) -> u32 {
    if count == 0 {
        0
    } else {
        offset
    }
}

fn all_methods(data: &ClassData) -> impl Iterator<Item = &EncodedMethod> {
    data.direct_methods.iter().chain(&data.virtual_methods)
}

fn write_class_data(out: &mut Vec<u8>, data: &ClassData, code_offsets: &[u32]) {
    write_uleb128(out, data.static_fields.len() as u32);
    write_uleb128(out, data.instance_fields.len() as u32);
    write_uleb128(out, data.direct_methods.len() as u32);
    write_uleb128(out, data.virtual_methods.len() as u32);
    for fields in [&data.static_fields, &data.instance_fields] {
        let mut prev = 0;
        for f in fields {
            write_uleb128(out, f.field_idx.wrapping_sub(prev));
            write_uleb128(out, f.access_flags);
            prev = f.field_idx;
        }
    }
    let (direct_codes, virtual_codes) = code_offsets.split_at(data.direct_methods.len());
    for (methods, codes) in [
        (&data.direct_methods, direct_codes),
        (&data.virtual_methods, virtual_codes),
    ] {
        let mut prev = 0;
        for (m, &code_off) in methods.iter().zip(codes) {
            write_uleb128(out, m.method_idx.wrapping_sub(prev));
            write_uleb128(out, m.access_flags);
            write_uleb128(out, code_off);
            prev = m.method_idx;
        }
    }
}

fn write_header(out: &mut Vec<u8>, h: &Header) {
    out.extend_from_slice(&h.magic);
    put_u32(out, h.checksum);
    out.extend_from_slice(&h.signature);
    for value in [
        h.file_size,
        h.header_size,
        h.endian_tag,
        h.link_size,
        h.link_off,
        h.map_off,
        h.string_ids_size,
        h.string_ids_off,
        h.type_ids_size,
        h.type_ids_off,
        h.proto_ids_size,
        h.proto_ids_off,
        h.field_ids_size,
        h.field_ids_off,
        h.method_ids_size,
        h.method_ids_off,
        h.class_defs_size,
        h.class_defs_off,
        h.data_size,
        h.data_off,
    ] {
        put_u32(out, value);
    }
}

impl DexFile {
    /// Serialize into a container that [`DexFile::parse`] reads back.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self).bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uleb128_encoding() {
        let mut out = Vec::new();
        write_uleb128(&mut out, 0);
        write_uleb128(&mut out, 127);
        write_uleb128(&mut out, 16256);
        assert_eq!(out, vec![0x00, 0x7f, 0x80, 0x7f]);
    }

    #[test]
    fn adler32_reference_value() {
        assert_eq!(adler32(b"Wikipedia"), 0x11e6_0398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn empty_file_layout() {
        let encoded = encode(&DexFile::default());
        assert_eq!(encoded.header.header_size, 0x70);
        assert_eq!(encoded.header.map_off, 0x70);
        assert_eq!(encoded.bytes.len() as u32, encoded.header.file_size);
        assert_eq!(&encoded.bytes[..8], b"dex\n035\0");
        // header item and the map list itself
        assert_eq!(encoded.map.len(), 2);
    }

    #[test]
    fn checksum_covers_everything_after_it() {
        let encoded = encode(&DexFile::default());
        let stored = u32::from_le_bytes(encoded.bytes[8..12].try_into().unwrap());
        assert_eq!(stored, adler32(&encoded.bytes[12..]));
    }
}
