//! User Datagram Protocol (RFC 768)

use lamina_core::{Error, Result};
use lamina_packet::{
    checksum_add, checksum_fold, ByteOrder, CrossLayerAnswer, CrossLayerQuery, FieldDef,
    FieldDefault, FieldLayout, Layer, Protocol,
};

use crate::ipv6::{pseudo_header, IP_PROTO_UDP};

/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

pub static UDP: Protocol = Protocol {
    name: "udp",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("sport", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("dport", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("ulen", FieldLayout::U16, FieldDefault::Uint(8)),
        FieldDef::new("sum", FieldLayout::U16, FieldDefault::Uint(0)),
    ],
    dissect: None,
    query: None,
    direction_pairs: &[("sport", "dport")],
};

/// Recompute the length field from the current header and payload
pub fn update_length(udp: &mut Layer) -> Result<()> {
    let total = udp.total_len()?;
    udp.set_uint("ulen", total as u64)
}

/// Recompute the UDP checksum over the pseudo-header and datagram.
///
/// `ip` is the network layer carrying the datagram. A computed checksum of
/// zero is transmitted as 0xFFFF; zero on the wire means "no checksum".
/// Skipped when neither the address pair's header nor the UDP header
/// changed since the last encode.
pub fn update_checksum(ip: &mut Layer) -> Result<()> {
    let answer = ip
        .query(CrossLayerQuery::AddressPair)
        .ok_or_else(|| Error::invalid_value("sum", "no address pair below udp"))?;
    let CrossLayerAnswer::AddressPair {
        src,
        dst,
        header_changed,
    } = answer;

    let udp = ip
        .find_mut(&UDP)
        .ok_or_else(|| Error::invalid_value("sum", "no udp layer in stack"))?;
    if !header_changed && !udp.header_changed() {
        return Ok(());
    }

    udp.set_uint("sum", 0)?;
    let datagram = udp.to_bytes()?;
    let sum = checksum_add(0, &pseudo_header(&src, &dst, IP_PROTO_UDP as u8, datagram.len()));
    let sum = checksum_fold(checksum_add(sum, &datagram));
    let sum = if sum == 0 { 0xFFFF } else { sum };
    udp.set_uint("sum", sum as u64)
}
