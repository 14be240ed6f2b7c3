//! Integration tests: full decode / mutate / re-encode cycles across
//! IPv6 extension chains and the transport layers.

use lamina_core::{Direction, Error};
use lamina_packet::{
    checksum_add, checksum_fold, FieldValue, Layer, MAX_NESTING_DEPTH,
};
use lamina_protocols::ipv6::{
    self, pseudo_header, IP6_FRAGMENT, IP6_HOPOPTS, IPV6, IP_PROTO_ESP, IP_PROTO_FRAGMENT,
    IP_PROTO_HOPOPTS, IP_PROTO_ICMP6, IP_PROTO_IP6, IP_PROTO_UDP,
};
use lamina_protocols::udp::{self, UDP};
use lamina_protocols::{default_registry, tcp};

fn ipv6_fixed_header(dlen: u16, nxt: u8, src: [u8; 16], dst: [u8; 16]) -> Vec<u8> {
    let mut buf = vec![0x60, 0, 0, 0];
    buf.extend_from_slice(&dlen.to_be_bytes());
    buf.push(nxt);
    buf.push(64);
    buf.extend_from_slice(&src);
    buf.extend_from_slice(&dst);
    buf
}

/// IPv6 / hop-by-hop / fragment / UDP("ping"), all length indicators valid
fn chained_packet() -> Vec<u8> {
    let mut buf = ipv6_fixed_header(28, IP_PROTO_HOPOPTS as u8, [0x10; 16], [0x20; 16]);
    // hop-by-hop: next = fragment, zero extra units, one PadN option
    buf.extend_from_slice(&[IP_PROTO_FRAGMENT as u8, 0, 1, 4, 0, 0, 0, 0]);
    // fragment: next = udp, offset 0, more-fragments set
    buf.extend_from_slice(&[IP_PROTO_UDP as u8, 0, 0x00, 0x01]);
    buf.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    // udp: 12345 -> 53, length 12, checksum 0
    buf.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0x00, 0x0C, 0x00, 0x00]);
    buf.extend_from_slice(b"ping");
    buf
}

#[test]
fn test_chain_decode_and_identical_reencode() {
    let registry = default_registry();
    let input = chained_packet();
    let mut ip = Layer::decode(&IPV6, &input, &registry).unwrap();

    let chain = ip.layer_list("opts").unwrap();
    assert_eq!(chain.len(), 2);
    assert!(chain.get(0).unwrap().protocol().is(&IP6_HOPOPTS));
    assert!(chain.get(1).unwrap().protocol().is(&IP6_FRAGMENT));
    assert_eq!(chain.get(1).unwrap().uint("id").unwrap(), 0xDEAD_BEEF);
    assert!(ipv6::more_fragments(chain.get(1).unwrap()).unwrap());

    let udp_layer = ip.find(&UDP).unwrap();
    assert_eq!(udp_layer.uint("dport").unwrap(), 53);
    assert_eq!(udp_layer.payload().unwrap(), b"ping");

    // nothing mutated: re-encoding is byte-identical, and stays so
    assert_eq!(ip.to_bytes().unwrap(), input);
    assert_eq!(ip.to_bytes().unwrap(), input);
}

#[test]
fn test_scalar_mutation_changes_only_its_bytes() {
    let registry = default_registry();
    let input = chained_packet();
    let mut ip = Layer::decode(&IPV6, &input, &registry).unwrap();

    assert!(!ip.header_changed());
    ip.set_uint("hlim", 63).unwrap();
    assert!(ip.header_changed());

    let out = ip.to_bytes().unwrap();
    assert_eq!(out[7], 63);
    assert_eq!(out[..7], input[..7]);
    assert_eq!(out[8..], input[8..]);
    assert!(!ip.header_changed());
}

#[test]
fn test_chain_element_mutation_dirties_owner() {
    let registry = default_registry();
    let input = chained_packet();
    let mut ip = Layer::decode(&IPV6, &input, &registry).unwrap();

    ip.layer_list_mut("opts")
        .unwrap()
        .get_mut(1)
        .unwrap()
        .set_uint("id", 0x0102_0304)
        .unwrap();
    assert!(ip.header_changed());

    let out = ip.to_bytes().unwrap();
    // fragment id sits at the end of the second sub-header
    assert_eq!(&out[52..56], &[0x01, 0x02, 0x03, 0x04]);
    assert_eq!(out.len(), input.len());
    assert_eq!(out[..52], input[..52]);
    assert_eq!(out[56..], input[56..]);
}

#[test]
fn test_unregistered_terminal_type_keeps_raw_payload() {
    let registry = default_registry();
    let mut buf = ipv6_fixed_header(4, IP_PROTO_ICMP6 as u8, [1; 16], [2; 16]);
    buf.extend_from_slice(&[0x80, 0, 0, 0]);

    let ip = Layer::decode(&IPV6, &buf, &registry).unwrap();
    assert!(ip.inner().is_none());
    assert_eq!(ip.payload().unwrap(), &[0x80, 0, 0, 0]);
}

#[test]
fn test_esp_aborts_the_whole_ipv6_layer() {
    let registry = default_registry();
    let mut buf = ipv6_fixed_header(8, IP_PROTO_ESP as u8, [1; 16], [2; 16]);
    buf.extend_from_slice(&[IP_PROTO_UDP as u8, 0, 0, 0, 0, 0, 0, 0]);

    assert!(matches!(
        Layer::decode(&IPV6, &buf, &registry),
        Err(Error::UnsupportedExtension { type_code, .. }) if type_code == IP_PROTO_ESP
    ));
}

#[test]
fn test_nesting_depth_guard() {
    let registry = default_registry();

    // innermost: IPv6 carrying 4 raw bytes, then 20 IPv6-in-IPv6 wrappers
    let mut packet = ipv6_fixed_header(4, IP_PROTO_ICMP6 as u8, [9; 16], [9; 16]);
    packet.extend_from_slice(&[0xFF; 4]);
    for _ in 0..20 {
        let mut outer =
            ipv6_fixed_header(packet.len() as u16, IP_PROTO_IP6 as u8, [9; 16], [9; 16]);
        outer.extend_from_slice(&packet);
        packet = outer;
    }

    let ip = Layer::decode(&IPV6, &packet, &registry).unwrap();
    let mut depth = 1;
    let mut current = &ip;
    while let Some(inner) = current.inner() {
        depth += 1;
        current = inner;
    }
    // decoding stops at the budget; the rest stays raw on the last layer
    assert_eq!(depth, MAX_NESTING_DEPTH + 1);
    assert!(!current.payload().unwrap().is_empty());
}

#[test]
fn test_direction_classification_across_packets() {
    let registry = default_registry();
    let a = Layer::decode(
        &IPV6,
        &ipv6_fixed_header(0, IP_PROTO_ICMP6 as u8, [1; 16], [2; 16]),
        &registry,
    )
    .unwrap();
    let same = Layer::decode(
        &IPV6,
        &ipv6_fixed_header(0, IP_PROTO_ICMP6 as u8, [1; 16], [2; 16]),
        &registry,
    )
    .unwrap();
    let reverse = Layer::decode(
        &IPV6,
        &ipv6_fixed_header(0, IP_PROTO_ICMP6 as u8, [2; 16], [1; 16]),
        &registry,
    )
    .unwrap();
    let unrelated = Layer::decode(
        &IPV6,
        &ipv6_fixed_header(0, IP_PROTO_ICMP6 as u8, [7; 16], [8; 16]),
        &registry,
    )
    .unwrap();

    assert_eq!(a.direction(&same), Direction::Same);
    assert_eq!(a.direction(&reverse), Direction::Reverse);
    assert_eq!(a.direction(&unrelated), Direction::Unrelated);
}

#[test]
fn test_udp_checksum_update_and_verify() {
    let registry = default_registry();
    let mut buf = ipv6_fixed_header(12, IP_PROTO_UDP as u8, [0x10; 16], [0x20; 16]);
    buf.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0x00, 0x0C, 0x12, 0x34]);
    buf.extend_from_slice(b"ping");

    let mut ip = Layer::decode(&IPV6, &buf, &registry).unwrap();

    // freshly decoded and unmutated: the recompute is skipped, even though
    // the decoded checksum is wrong
    udp::update_checksum(&mut ip).unwrap();
    assert_eq!(ip.find(&UDP).unwrap().uint("sum").unwrap(), 0x1234);

    // any mutation lifts the gate
    ip.find_mut(&UDP).unwrap().set_uint("sum", 0).unwrap();
    udp::update_checksum(&mut ip).unwrap();
    let sum = ip.find(&UDP).unwrap().uint("sum").unwrap();
    assert_ne!(sum, 0);

    // a datagram summed together with its own checksum folds to zero
    let datagram = ip.find_mut(&UDP).unwrap().to_bytes().unwrap();
    let ph = pseudo_header(&[0x10; 16], &[0x20; 16], IP_PROTO_UDP as u8, datagram.len());
    let total = checksum_add(checksum_add(0, &ph), &datagram);
    assert_eq!(checksum_fold(total), 0);
}

#[test]
fn test_tcp_checksum_over_options() {
    let registry = default_registry();
    let mut buf = ipv6_fixed_header(28, 6, [3; 16], [4; 16]);
    buf.extend_from_slice(&[0x30, 0x39, 0x00, 0x50]); // ports
    buf.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0]); // seq, ack
    buf.push(0x60); // data offset 6 words
    buf.push(0x02); // SYN
    buf.extend_from_slice(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00]); // win, sum, urp
    buf.extend_from_slice(&[2, 4, 0x05, 0xB4]); // MSS 1460

    let mut ip = Layer::decode(&IPV6, &buf, &registry).unwrap();
    let tcp_layer = ip.find_mut(&tcp::TCP).unwrap();
    assert_eq!(tcp_layer.tuple_list("opts").unwrap().len(), 1);

    tcp_layer.set_uint("seq", 2).unwrap();
    tcp::update_checksum(&mut ip).unwrap();

    let segment = ip.find_mut(&tcp::TCP).unwrap().to_bytes().unwrap();
    let ph = pseudo_header(&[3; 16], &[4; 16], 6, segment.len());
    let total = checksum_add(checksum_add(0, &ph), &segment);
    assert_eq!(checksum_fold(total), 0);
}

#[test]
fn test_hand_built_stack_round_trips() {
    let mut udp_layer = Layer::with_fields(
        &UDP,
        &[
            ("sport", FieldValue::Uint(4000)),
            ("dport", FieldValue::Uint(4001)),
        ],
    )
    .unwrap();
    udp_layer.set_payload(b"data".to_vec());
    udp::update_length(&mut udp_layer).unwrap();

    let ip_layer = Layer::with_fields(
        &IPV6,
        &[
            ("nxt", FieldValue::Uint(IP_PROTO_UDP as u64)),
            ("hlim", FieldValue::Uint(64)),
            ("src", FieldValue::Bytes(vec![0xAA; 16])),
            ("dst", FieldValue::Bytes(vec![0xBB; 16])),
        ],
    )
    .unwrap();

    let mut ip = ip_layer / udp_layer;
    ipv6::update_payload_len(&mut ip).unwrap();
    udp::update_checksum(&mut ip).unwrap();
    let bytes = ip.to_bytes().unwrap();
    assert_eq!(bytes.len(), 40 + 8 + 4);
    assert_eq!(&bytes[4..6], &[0, 12]); // payload length

    let registry = default_registry();
    let mut decoded = Layer::decode(&IPV6, &bytes, &registry).unwrap();
    let inner = decoded.find(&UDP).unwrap();
    assert_eq!(inner.uint("sport").unwrap(), 4000);
    assert_eq!(inner.payload().unwrap(), b"data");
    assert_eq!(decoded.to_bytes().unwrap(), bytes);
}
