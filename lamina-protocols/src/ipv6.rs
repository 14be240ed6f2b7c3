//! Internet Protocol version 6 (RFC 2460)
//!
//! The hard part of IPv6 is not the fixed 40-byte header but the chain of
//! extension headers behind it: a sequence of self-describing sub-headers,
//! each carrying the numeric type of the one that follows, terminated by
//! the first type that is not an extension. The chain is decoded into the
//! layer's "opts" field as a [`LayerList`]; the terminal type code and the
//! remaining bytes go to the handler registry.

use lamina_core::{Error, Result};
use lamina_packet::{
    CrossLayerAnswer, CrossLayerQuery, Dissection, FieldDef, FieldDefault, FieldLayout,
    FieldValue, HandlerRegistry, Layer, LayerList, Protocol,
};
use lamina_packet::ByteOrder;

use bytes::{BufMut, BytesMut};
use tracing::trace;

/// IP protocol numbers shared by the extension chain and the handler table
pub const IP_PROTO_HOPOPTS: u32 = 0;
pub const IP_PROTO_TCP: u32 = 6;
pub const IP_PROTO_UDP: u32 = 17;
pub const IP_PROTO_IP6: u32 = 41;
pub const IP_PROTO_ROUTING: u32 = 43;
pub const IP_PROTO_FRAGMENT: u32 = 44;
pub const IP_PROTO_ESP: u32 = 50;
pub const IP_PROTO_AH: u32 = 51;
pub const IP_PROTO_ICMP6: u32 = 58;
pub const IP_PROTO_DSTOPTS: u32 = 60;

/// Fixed IPv6 header length in bytes
pub const FIXED_HEADER_LEN: usize = 40;

pub static IPV6: Protocol = Protocol {
    name: "ipv6",
    byte_order: ByteOrder::Big,
    fields: &[
        // version (4 bits), traffic class (8 bits), flow label (20 bits)
        FieldDef::new("v_fc_flow", FieldLayout::U32, FieldDefault::Uint(0x6000_0000)),
        // payload length, extension headers included
        FieldDef::new("dlen", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("nxt", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("hlim", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("src", FieldLayout::Bytes(16), FieldDefault::Bytes(&[0; 16])),
        FieldDef::new("dst", FieldLayout::Bytes(16), FieldDefault::Bytes(&[0; 16])),
        // extension-header chain, attached by the dissector
        FieldDef::new("opts", FieldLayout::Var, FieldDefault::Absent),
    ],
    dissect: Some(dissect_ipv6),
    query: Some(query_ipv6),
    direction_pairs: &[("src", "dst")],
};

/// Hop-by-hop options extension header
pub static IP6_HOPOPTS: Protocol = Protocol {
    name: "ip6_hopopts",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("nxt", FieldLayout::U8, FieldDefault::Uint(0)),
        // extra length in 8-octet units beyond the first 8 octets
        FieldDef::new("len", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("opts", FieldLayout::Var, FieldDefault::Absent),
    ],
    dissect: Some(dissect_tlv_options),
    query: None,
    direction_pairs: &[],
};

/// Destination options extension header; shares the TLV option format
/// with hop-by-hop options.
pub static IP6_DSTOPTS: Protocol = Protocol {
    name: "ip6_dstopts",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("nxt", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("len", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("opts", FieldLayout::Var, FieldDefault::Absent),
    ],
    dissect: Some(dissect_tlv_options),
    query: None,
    direction_pairs: &[],
};

/// One TLV option inside an options extension header
pub static IP6_OPTION: Protocol = Protocol {
    name: "ip6_option",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("type", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("len", FieldLayout::U8, FieldDefault::Uint(0)),
    ],
    dissect: None,
    query: None,
    direction_pairs: &[],
};

/// The Pad1 option: a single type byte, no length or data (RFC 2460 §4.2)
pub static IP6_OPTION_PAD: Protocol = Protocol {
    name: "ip6_option_pad",
    byte_order: ByteOrder::Big,
    fields: &[FieldDef::new("type", FieldLayout::U8, FieldDefault::Uint(0))],
    dissect: None,
    query: None,
    direction_pairs: &[],
};

/// Routing extension header (type 0)
pub static IP6_ROUTING: Protocol = Protocol {
    name: "ip6_routing",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("nxt", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("len", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("rtype", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("segs_left", FieldLayout::U8, FieldDefault::Uint(0)),
        // reserved byte plus strict/loose bitmap
        FieldDef::new("rsvd_sl_bits", FieldLayout::U32, FieldDefault::Uint(0)),
        FieldDef::new("addresses", FieldLayout::Var, FieldDefault::Absent),
    ],
    dissect: Some(dissect_routing),
    query: None,
    direction_pairs: &[],
};

/// One 16-byte address entry of a routing header
pub static IP6_ROUTING_ADDRESS: Protocol = Protocol {
    name: "ip6_routing_address",
    byte_order: ByteOrder::Big,
    fields: &[FieldDef::new("addr", FieldLayout::Bytes(16), FieldDefault::Bytes(&[0; 16]))],
    dissect: None,
    query: None,
    direction_pairs: &[],
};

/// Fragment extension header
pub static IP6_FRAGMENT: Protocol = Protocol {
    name: "ip6_fragment",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("nxt", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("resv", FieldLayout::U8, FieldDefault::Uint(0)),
        // fragment offset (13 bits), reserved (2 bits), more-fragments flag
        FieldDef::new("frag_off_resv_m", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("id", FieldLayout::U32, FieldDefault::Uint(0)),
    ],
    dissect: None,
    query: None,
    direction_pairs: &[],
};

/// Authentication extension header
pub static IP6_AH: Protocol = Protocol {
    name: "ip6_ah",
    byte_order: ByteOrder::Big,
    fields: &[
        FieldDef::new("nxt", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("len", FieldLayout::U8, FieldDefault::Uint(0)),
        FieldDef::new("resv", FieldLayout::U16, FieldDefault::Uint(0)),
        FieldDef::new("spi", FieldLayout::U32, FieldDefault::Uint(0)),
        FieldDef::new("seq", FieldLayout::U32, FieldDefault::Uint(0)),
    ],
    dissect: None,
    query: None,
    direction_pairs: &[],
};

/// Encapsulating Security Payload: part of the known extension set but
/// intentionally not decodable.
pub static IP6_ESP: Protocol = Protocol {
    name: "ip6_esp",
    byte_order: ByteOrder::Big,
    fields: &[],
    dissect: Some(dissect_esp),
    query: None,
    direction_pairs: &[],
};

/// Sub-decoder for a known extension type, or `None` for terminal types
fn extension_protocol(type_code: u32) -> Option<&'static Protocol> {
    match type_code {
        IP_PROTO_HOPOPTS => Some(&IP6_HOPOPTS),
        IP_PROTO_ROUTING => Some(&IP6_ROUTING),
        IP_PROTO_FRAGMENT => Some(&IP6_FRAGMENT),
        IP_PROTO_ESP => Some(&IP6_ESP),
        IP_PROTO_AH => Some(&IP6_AH),
        IP_PROTO_DSTOPTS => Some(&IP6_DSTOPTS),
        _ => None,
    }
}

/// Whether a next-header code names an extension header
pub fn is_extension(type_code: u32) -> bool {
    extension_protocol(type_code).is_some()
}

/// Walk the extension-header chain, then hand the terminal type code and
/// payload offset to the handler registry.
fn dissect_ipv6(d: &mut Dissection<'_>) -> Result<()> {
    let buf = d.buf();
    // the engine has already guaranteed the 40-byte fixed header
    let dlen = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let declared_end = FIXED_HEADER_LEN + dlen;

    let mut type_code = buf[6] as u32;
    let mut off = FIXED_HEADER_LEN;
    let mut chain = LayerList::new();

    while let Some(proto) = extension_protocol(type_code) {
        if off + 2 > buf.len() {
            return Err(Error::malformed("ipv6: extension chain overruns buffer"));
        }
        // one 8-byte unit minimum plus `indicator` extra units; an indicator
        // of zero still consumes 8 bytes, so the loop always advances
        let sub_len = 8 + buf[off + 1] as usize * 8;
        if off + sub_len > declared_end || off + sub_len > buf.len() {
            return Err(Error::malformed(
                "ipv6: extension chain overruns declared payload length",
            ));
        }
        let sub = d.decode_exact(proto, &buf[off..off + sub_len])?;
        // the next type code is the sub-header's own first byte
        let next_code = buf[off] as u32;
        chain.push(sub);
        type_code = next_code;
        off += sub_len;
    }

    if !chain.is_empty() {
        trace!(
            headers = chain.len(),
            terminal = type_code,
            "decoded ipv6 extension chain"
        );
        d.layer_mut().set("opts", Some(FieldValue::Layers(chain)))?;
    }
    d.set_next_protocol(type_code, off);
    Ok(())
}

/// TLV option parser shared by hop-by-hop and destination options
fn dissect_tlv_options(d: &mut Dissection<'_>) -> Result<()> {
    let buf = d.buf();
    let declared = 8 + buf[1] as usize * 8;
    if buf.len() < declared {
        return Err(Error::InsufficientData {
            needed: declared,
            got: buf.len(),
        });
    }

    let mut options = LayerList::new();
    let mut off = 2;
    while off < declared {
        let opt_type = buf[off];
        if opt_type == 0 {
            // Pad1: no length or data field
            options.push(Layer::new(&IP6_OPTION_PAD));
            off += 1;
        } else {
            if off + 2 > declared {
                return Err(Error::malformed("ipv6 options: truncated TLV option"));
            }
            let opt_len = buf[off + 1] as usize;
            if off + 2 + opt_len > declared {
                return Err(Error::malformed(
                    "ipv6 options: option data overruns header",
                ));
            }
            let mut opt = Layer::new(&IP6_OPTION);
            opt.set_uint("type", opt_type as u64)?;
            opt.set_uint("len", opt_len as u64)?;
            opt.add_field(
                "data",
                FieldLayout::Var,
                FieldValue::Bytes(buf[off + 2..off + 2 + opt_len].to_vec()),
            )?;
            options.push(opt);
            off += 2 + opt_len;
        }
    }

    d.layer_mut().set("opts", Some(FieldValue::Layers(options)))?;
    Ok(())
}

/// Routing header address block: the length indicator counts 8-octet
/// units, so each 16-byte address accounts for two of them. This rule is
/// specific to the routing sub-decoder, not part of the chain algorithm.
fn dissect_routing(d: &mut Dissection<'_>) -> Result<()> {
    let buf = d.buf();
    let declared = 8 + buf[1] as usize * 8;
    if buf.len() < declared {
        return Err(Error::InsufficientData {
            needed: declared,
            got: buf.len(),
        });
    }

    let count = buf[1] as usize / 2;
    if 8 + count * 16 > declared {
        return Err(Error::malformed(
            "ipv6 routing: address block overruns declared length",
        ));
    }

    let mut addresses = LayerList::new();
    for i in 0..count {
        let start = 8 + i * 16;
        let mut entry = Layer::new(&IP6_ROUTING_ADDRESS);
        entry.set_bytes("addr", buf[start..start + 16].to_vec())?;
        addresses.push(entry);
    }
    d.layer_mut()
        .set("addresses", Some(FieldValue::Layers(addresses)))?;
    Ok(())
}

fn dissect_esp(_d: &mut Dissection<'_>) -> Result<()> {
    Err(Error::UnsupportedExtension {
        protocol: IP6_ESP.name,
        type_code: IP_PROTO_ESP,
    })
}

/// Answer to transport-layer pseudo-header requests: the address pair plus
/// whether this header changed since it was last encoded.
fn query_ipv6(layer: &Layer, request: CrossLayerQuery) -> Option<CrossLayerAnswer> {
    match request {
        CrossLayerQuery::AddressPair => Some(CrossLayerAnswer::AddressPair {
            src: layer.bytes("src").ok()?.to_vec(),
            dst: layer.bytes("dst").ok()?.to_vec(),
            header_changed: layer.header_changed(),
        }),
    }
}

/// Register the transport handlers reached through an IPv6 header
pub fn register_handlers(registry: &mut HandlerRegistry) {
    registry.register_all(
        &IPV6,
        &[
            (IP_PROTO_TCP, &crate::tcp::TCP),
            (IP_PROTO_UDP, &crate::udp::UDP),
            (IP_PROTO_IP6, &IPV6),
        ],
    );
}

/// IPv6 pseudo-header used by upper-layer checksums (RFC 2460 §8.1)
pub fn pseudo_header(src: &[u8], dst: &[u8], next: u8, length: usize) -> Vec<u8> {
    let mut bytes = BytesMut::with_capacity(40);
    bytes.put_slice(src);
    bytes.put_slice(dst);
    bytes.put_u32(length as u32);
    bytes.put_slice(&[0, 0, 0]);
    bytes.put_u8(next);
    bytes.to_vec()
}

/// Recompute the payload-length field from the current layer stack
pub fn update_payload_len(ip: &mut Layer) -> Result<()> {
    let total = ip.total_len()?;
    ip.set_uint("dlen", (total - FIXED_HEADER_LEN) as u64)
}

// Bit-level accessors over the packed version/class/flow word.

pub fn version(ip: &Layer) -> Result<u8> {
    Ok(((ip.uint("v_fc_flow")? >> 28) & 0xF) as u8)
}

pub fn set_version(ip: &mut Layer, version: u8) -> Result<()> {
    let word = ip.uint("v_fc_flow")?;
    ip.set_uint(
        "v_fc_flow",
        (word & !0xF000_0000) | (((version as u64) & 0xF) << 28),
    )
}

pub fn traffic_class(ip: &Layer) -> Result<u8> {
    Ok(((ip.uint("v_fc_flow")? >> 20) & 0xFF) as u8)
}

pub fn set_traffic_class(ip: &mut Layer, class: u8) -> Result<()> {
    let word = ip.uint("v_fc_flow")?;
    ip.set_uint("v_fc_flow", (word & !0x0FF0_0000) | ((class as u64) << 20))
}

pub fn flow_label(ip: &Layer) -> Result<u32> {
    Ok((ip.uint("v_fc_flow")? & 0xF_FFFF) as u32)
}

pub fn set_flow_label(ip: &mut Layer, label: u32) -> Result<()> {
    let word = ip.uint("v_fc_flow")?;
    ip.set_uint("v_fc_flow", (word & !0xF_FFFF) | ((label as u64) & 0xF_FFFF))
}

// Fragment-header accessors.

pub fn fragment_offset(frag: &Layer) -> Result<u16> {
    Ok((frag.uint("frag_off_resv_m")? >> 3) as u16)
}

pub fn set_fragment_offset(frag: &mut Layer, offset: u16) -> Result<()> {
    let word = frag.uint("frag_off_resv_m")?;
    frag.set_uint(
        "frag_off_resv_m",
        (word & 0x7) | (((offset as u64) & 0x1FFF) << 3),
    )
}

// Routing-header accessors: the strict/loose bitmap occupies the low 24
// bits of the packed reserved word.

pub fn sl_bits(routing: &Layer) -> Result<u32> {
    Ok((routing.uint("rsvd_sl_bits")? & 0xFF_FFFF) as u32)
}

pub fn set_sl_bits(routing: &mut Layer, bits: u32) -> Result<()> {
    let word = routing.uint("rsvd_sl_bits")?;
    routing.set_uint(
        "rsvd_sl_bits",
        (word & !0xFF_FFFF) | ((bits as u64) & 0xFF_FFFF),
    )
}

pub fn more_fragments(frag: &Layer) -> Result<bool> {
    Ok(frag.uint("frag_off_resv_m")? & 1 == 1)
}

pub fn set_more_fragments(frag: &mut Layer, more: bool) -> Result<()> {
    let word = frag.uint("frag_off_resv_m")?;
    frag.set_uint("frag_off_resv_m", (word & !1) | more as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_header(dlen: u16, nxt: u8) -> Vec<u8> {
        let mut buf = vec![0x60, 0, 0, 0];
        buf.extend_from_slice(&dlen.to_be_bytes());
        buf.push(nxt);
        buf.push(64); // hop limit
        buf.extend_from_slice(&[0x11; 16]);
        buf.extend_from_slice(&[0x22; 16]);
        buf
    }

    #[test]
    fn test_decode_plain_header() {
        let registry = HandlerRegistry::new();
        let mut buf = fixed_header(4, IP_PROTO_ICMP6 as u8);
        buf.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let layer = Layer::decode(&IPV6, &buf, &registry).unwrap();
        assert_eq!(version(&layer).unwrap(), 6);
        assert_eq!(layer.uint("hlim").unwrap(), 64);
        assert_eq!(layer.uint("dlen").unwrap(), 4);
        assert!(!layer.is_present("opts"));
        // ICMPv6 has no registered handler, payload stays raw
        assert_eq!(layer.payload().unwrap(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_decode_hopopts_chain() {
        let registry = HandlerRegistry::new();
        let mut buf = fixed_header(8 + 2, IP_PROTO_HOPOPTS as u8);
        // hop-by-hop: next = ICMPv6, zero extra units, one PadN option
        buf.extend_from_slice(&[IP_PROTO_ICMP6 as u8, 0, 1, 4, 0, 0, 0, 0]);
        buf.extend_from_slice(&[0xAA, 0xBB]);

        let layer = Layer::decode(&IPV6, &buf, &registry).unwrap();
        let chain = layer.layer_list("opts").unwrap();
        assert_eq!(chain.len(), 1);

        let hopopts = chain.get(0).unwrap();
        assert!(hopopts.protocol().is(&IP6_HOPOPTS));
        assert_eq!(hopopts.uint("nxt").unwrap(), IP_PROTO_ICMP6 as u64);
        let options = hopopts.layer_list("opts").unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options.get(0).unwrap().uint("type").unwrap(), 1);

        assert_eq!(layer.payload().unwrap(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_pad1_options() {
        let registry = HandlerRegistry::new();
        let mut buf = fixed_header(8, IP_PROTO_DSTOPTS as u8);
        // destination options padded entirely with Pad1 bytes
        buf.extend_from_slice(&[IP_PROTO_ICMP6 as u8, 0, 0, 0, 0, 0, 0, 0]);

        let layer = Layer::decode(&IPV6, &buf, &registry).unwrap();
        let chain = layer.layer_list("opts").unwrap();
        let dstopts = chain.get(0).unwrap();
        assert_eq!(dstopts.layer_list("opts").unwrap().len(), 6);
    }

    #[test]
    fn test_routing_header_addresses() {
        let registry = HandlerRegistry::new();
        let mut buf = fixed_header(24, IP_PROTO_ROUTING as u8);
        // routing: next = ICMPv6, two 8-octet units = one address
        buf.extend_from_slice(&[IP_PROTO_ICMP6 as u8, 2, 0, 1, 0, 0, 0, 0]);
        buf.extend_from_slice(&[0x33; 16]);

        let layer = Layer::decode(&IPV6, &buf, &registry).unwrap();
        let chain = layer.layer_list("opts").unwrap();
        let routing = chain.get(0).unwrap();
        assert!(routing.protocol().is(&IP6_ROUTING));
        let addresses = routing.layer_list("addresses").unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(
            addresses.get(0).unwrap().bytes("addr").unwrap(),
            &[0x33; 16]
        );
    }

    #[test]
    fn test_esp_is_unsupported() {
        let registry = HandlerRegistry::new();
        let mut buf = fixed_header(8, IP_PROTO_ESP as u8);
        buf.extend_from_slice(&[IP_PROTO_ICMP6 as u8, 0, 0, 0, 0, 0, 0, 0]);

        assert!(matches!(
            Layer::decode(&IPV6, &buf, &registry),
            Err(Error::UnsupportedExtension { type_code: 50, .. })
        ));
    }

    #[test]
    fn test_chain_overrun_is_malformed() {
        let registry = HandlerRegistry::new();
        // dlen says 8 bytes of payload but the sub-header claims 3 extra units
        let mut buf = fixed_header(8, IP_PROTO_HOPOPTS as u8);
        buf.extend_from_slice(&[IP_PROTO_ICMP6 as u8, 3, 0, 0, 0, 0, 0, 0]);

        assert!(matches!(
            Layer::decode(&IPV6, &buf, &registry),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_bit_accessors() {
        let mut ip = Layer::new(&IPV6);
        set_traffic_class(&mut ip, 0xF1).unwrap();
        set_flow_label(&mut ip, 0x23456).unwrap();
        assert_eq!(version(&ip).unwrap(), 6);
        assert_eq!(traffic_class(&ip).unwrap(), 0xF1);
        assert_eq!(flow_label(&ip).unwrap(), 0x23456);
        // neighbors are untouched
        set_version(&mut ip, 7).unwrap();
        assert_eq!(traffic_class(&ip).unwrap(), 0xF1);
        assert_eq!(flow_label(&ip).unwrap(), 0x23456);
    }

    #[test]
    fn test_routing_sl_bits() {
        let mut routing = Layer::new(&IP6_ROUTING);
        routing.set_uint("rsvd_sl_bits", 0xAB00_0000).unwrap();
        set_sl_bits(&mut routing, 0x15).unwrap();
        assert_eq!(sl_bits(&routing).unwrap(), 0x15);
        // the reserved byte above the bitmap is untouched
        assert_eq!(routing.uint("rsvd_sl_bits").unwrap(), 0xAB00_0015);
    }

    #[test]
    fn test_fragment_accessors() {
        let mut frag = Layer::new(&IP6_FRAGMENT);
        set_fragment_offset(&mut frag, 185).unwrap();
        set_more_fragments(&mut frag, true).unwrap();
        assert_eq!(fragment_offset(&frag).unwrap(), 185);
        assert!(more_fragments(&frag).unwrap());
        set_more_fragments(&mut frag, false).unwrap();
        assert_eq!(fragment_offset(&frag).unwrap(), 185);
        assert!(!more_fragments(&frag).unwrap());
    }

    #[test]
    fn test_pseudo_header_layout() {
        let ph = pseudo_header(&[1; 16], &[2; 16], 6, 20);
        assert_eq!(ph.len(), 40);
        assert_eq!(&ph[32..36], &[0, 0, 0, 20]);
        assert_eq!(ph[39], 6);
    }
}
