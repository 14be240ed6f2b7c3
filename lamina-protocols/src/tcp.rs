//! Transmission Control Protocol (RFC 793)
//!
//! Options between the fixed 20-byte header and the payload are kept as a
//! [`TupleList`] of `(kind, value)` pairs rather than nested layers: they
//! are opaque to the engine and only need faithful re-serialization.

use lamina_core::{Error, Result};
use lamina_packet::{
    checksum_add, checksum_fold, ByteOrder, CrossLayerAnswer, CrossLayerQuery, Dissection,
    FieldDef, FieldDefault, FieldLayout, FieldValue, Layer, Protocol, TupleList,
};

use crate::ipv6::{pseudo_header, IP_PROTO_TCP};

/// Fixed header length without options
pub const TCP_HEADER_MIN: usize = 20;

/// Flag bits of the `flags` field
pub const TH_FIN: u64 = 0x01;
pub const TH_SYN: u64 = 0x02;
pub const TH_RST: u64 = 0x04;
pub const TH_PUSH: u64 = 0x08;
pub const TH_ACK: u64 = 0x10;
pub const TH_URG: u64 = 0x20;

/// Option kinds with dedicated wire formats
pub const TCP_OPT_EOL: u8 = 0;
pub const TCP_OPT_NOP: u8 = 1;
pub const TCP_OPT_MSS: u8 = 2;
pub const TCP_OPT_WSCALE: u8 = 3;
pub const TCP_OPT_SACKOK: u8 = 4;
pub const TCP_OPT_TIMESTAMP: u8 = 8;

pub static TCP: Protocol = Protocol {
    name: "tcp",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("sport", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("dport", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("seq", FieldLayout::U32, FieldDefault::Uint(0)),
        FieldDef::new("ack", FieldLayout::U32, FieldDefault::Uint(0)),
        // data offset in 32-bit words (high nibble), reserved bits low
        FieldDef::new("off_x2", FieldLayout::U8, FieldDefault::Uint(0x50)),
        FieldDef::new("flags", FieldLayout::U8, FieldDefault::Uint(TH_SYN)),
        FieldDef::new("win", FieldLayout::U16, FieldDefault::Uint(0xFFFF)),
        FieldDef::new("sum", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("urp", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("opts", FieldLayout::Var, FieldDefault::Absent),
    ],
    dissect: Some(dissect_tcp),
    query: None,
    direction_pairs: &[("sport", "dport")],
};

fn dissect_tcp(d: &mut Dissection<'_>) -> Result<()> {
    let buf = d.buf();
    let data_offset = ((buf[12] >> 4) as usize) * 4;
    if data_offset < TCP_HEADER_MIN {
        return Err(Error::malformed("tcp: data offset below minimum header"));
    }
    if buf.len() < data_offset {
        return Err(Error::InsufficientData {
            needed: data_offset,
            got: buf.len(),
        });
    }
    if data_offset > TCP_HEADER_MIN {
        let options = parse_options(&buf[TCP_HEADER_MIN..data_offset])?;
        d.layer_mut().set("opts", Some(FieldValue::Tuples(options)))?;
    }
    Ok(())
}

fn parse_options(buf: &[u8]) -> Result<TupleList> {
    let mut options = TupleList::new(pack_options);
    let mut off = 0;
    while off < buf.len() {
        let kind = buf[off];
        match kind {
            // EOL and NOP are single bare kind bytes
            TCP_OPT_EOL | TCP_OPT_NOP => {
                options.push(vec![kind], Vec::new());
                off += 1;
            }
            _ => {
                if off + 2 > buf.len() {
                    return Err(Error::malformed("tcp: truncated option"));
                }
                let opt_len = buf[off + 1] as usize;
                if opt_len < 2 || off + opt_len > buf.len() {
                    return Err(Error::malformed("tcp: bad option length"));
                }
                options.push(vec![kind], buf[off + 2..off + opt_len].to_vec());
                off += opt_len;
            }
        }
    }
    Ok(options)
}

/// Re-serialize `(kind, value)` option pairs; the kind-length-value shape
/// is restored from the kind, mirroring [`parse_options`].
fn pack_options(items: &[(Vec<u8>, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (kind, value) in items {
        let &[kind] = kind.as_slice() else {
            return Err(Error::pack("opts", "option kind must be a single byte"));
        };
        match kind {
            TCP_OPT_EOL | TCP_OPT_NOP => out.push(kind),
            _ => {
                let opt_len = 2 + value.len();
                if opt_len > u8::MAX as usize {
                    return Err(Error::pack("opts", "option value too long"));
                }
                out.push(kind);
                out.push(opt_len as u8);
                out.extend_from_slice(value);
            }
        }
    }
    Ok(out)
}

/// Header length currently encoded in the data-offset nibble, in bytes
pub fn data_offset(tcp: &Layer) -> Result<usize> {
    Ok(((tcp.uint("off_x2")? >> 4) as usize) * 4)
}

/// Recompute the data-offset nibble from the current header layout.
/// Fails when the header is not a whole number of 32-bit words; pad with
/// NOP or EOL options first.
pub fn update_data_offset(tcp: &mut Layer) -> Result<()> {
    let header_len = tcp.header_len()?;
    if header_len % 4 != 0 {
        return Err(Error::pack(
            "off_x2",
            format!("header length {header_len} is not 32-bit aligned"),
        ));
    }
    let reserved = tcp.uint("off_x2")? & 0x0F;
    tcp.set_uint("off_x2", (((header_len / 4) as u64) << 4) | reserved)
}

/// Recompute the TCP checksum over the pseudo-header and segment.
///
/// `ip` is the network layer carrying the segment; the recompute is skipped
/// when neither the address pair's header nor the TCP header changed since
/// the last encode.
pub fn update_checksum(ip: &mut Layer) -> Result<()> {
    let answer = ip
        .query(CrossLayerQuery::AddressPair)
        .ok_or_else(|| Error::invalid_value("sum", "no address pair below tcp"))?;
    let CrossLayerAnswer::AddressPair {
        src,
        dst,
        header_changed,
    } = answer;

    let tcp = ip
        .find_mut(&TCP)
        .ok_or_else(|| Error::invalid_value("sum", "no tcp layer in stack"))?;
    if !header_changed && !tcp.header_changed() {
        return Ok(());
    }

    tcp.set_uint("sum", 0)?;
    let segment = tcp.to_bytes()?;
    let sum = checksum_add(0, &pseudo_header(&src, &dst, IP_PROTO_TCP as u8, segment.len()));
    let sum = checksum_add(sum, &segment);
    tcp.set_uint("sum", checksum_fold(sum) as u64)
}
