//! Packet event adapter: turns raw captured frames into canonical
//! [`PacketEvent`]s.
//!
//! Extraction is best-effort. Addresses default to empty strings and ports
//! to `None` when the corresponding layer was not decoded; the protocol
//! label is the deepest layer that was. The only outright rejection is a
//! frame the link-layer slicer cannot make sense of, reported as an
//! explicit [`SkipReason`] so the driver can count it and move on.

use crate::pipeline::types::{PacketEvent, SkipReason};
use chrono::{DateTime, TimeZone, Utc};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};

/// Builds a [`PacketEvent`] from a live or replayed pcap packet.
pub fn from_capture(packet: &pcap::Packet) -> Result<PacketEvent, SkipReason> {
    packet_event(
        timestamp_from_header(packet.header),
        i64::from(packet.header.len),
        packet.data,
    )
}

/// Converts the capture header's timeval into a UTC timestamp.
///
/// Returns `None` when the seconds value is outside the representable
/// range; the resulting event is then dropped by the resolver. A
/// microseconds field outside `0..1_000_000` (seen in corrupted capture
/// files) degrades to whole-second precision instead of rejecting the
/// packet.
pub fn timestamp_from_header(header: &pcap::PacketHeader) -> Option<DateTime<Utc>> {
    let sec = header.ts.tv_sec as i64;
    let usec = header.ts.tv_usec as i64;

    let nanos = if (0..1_000_000).contains(&usec) {
        (usec * 1000) as u32
    } else {
        0
    };

    Utc.timestamp_opt(sec, nanos).single()
}

/// Decodes one Ethernet frame into an event.
///
/// # Errors
/// [`SkipReason::MalformedFrame`] when the frame cannot be sliced.
pub fn packet_event(
    timestamp: Option<DateTime<Utc>>,
    length: i64,
    frame: &[u8],
) -> Result<PacketEvent, SkipReason> {
    let sliced = SlicedPacket::from_ethernet(frame).map_err(|_| SkipReason::MalformedFrame)?;

    let (src_ip, dst_ip, ip_label) = match &sliced.ip {
        Some(InternetSlice::Ipv4(h, _)) => (
            h.source_addr().to_string(),
            h.destination_addr().to_string(),
            "IPv4",
        ),
        Some(InternetSlice::Ipv6(h, _)) => (
            h.source_addr().to_string(),
            h.destination_addr().to_string(),
            "IPv6",
        ),
        None => (String::new(), String::new(), ""),
    };

    let (src_port, dst_port, transport_label) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            Some(tcp.source_port()),
            Some(tcp.destination_port()),
            Some("TCP"),
        ),
        Some(TransportSlice::Udp(udp)) => (
            Some(udp.source_port()),
            Some(udp.destination_port()),
            Some("UDP"),
        ),
        Some(TransportSlice::Icmpv4(_)) => (None, None, Some("ICMP")),
        Some(TransportSlice::Icmpv6(_)) => (None, None, Some("ICMPv6")),
        Some(TransportSlice::Unknown(_)) | None => (None, None, None),
    };

    Ok(PacketEvent {
        timestamp,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol: transport_label.unwrap_or(ip_label).to_string(),
        length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    const SRC_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 1];
    const DST_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 2];

    fn ts() -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(1_740_000_000, 0).single()
    }

    #[test]
    fn tcp_frame_yields_full_five_tuple() {
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv4([192, 168, 1, 10], [93, 184, 216, 34], 64)
            .tcp(1000, 80, 1234, 4096);
        let payload = [0u8; 8];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();

        let len = frame.len() as i64;
        let event = packet_event(ts(), len, &frame).unwrap();
        assert_eq!(event.src_ip, "192.168.1.10");
        assert_eq!(event.dst_ip, "93.184.216.34");
        assert_eq!(event.src_port, Some(1000));
        assert_eq!(event.dst_port, Some(80));
        assert_eq!(event.protocol, "TCP");
        assert_eq!(event.length, len);
    }

    #[test]
    fn udp_frame_is_labelled_udp() {
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(5353, 53);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[1, 2, 3]).unwrap();

        let event = packet_event(ts(), frame.len() as i64, &frame).unwrap();
        assert_eq!(event.protocol, "UDP");
        assert_eq!(event.dst_port, Some(53));
    }

    #[test]
    fn icmp_frame_has_no_ports_but_keeps_addresses() {
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .icmpv4_echo_request(7, 1);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[]).unwrap();

        let event = packet_event(ts(), frame.len() as i64, &frame).unwrap();
        assert_eq!(event.protocol, "ICMP");
        assert_eq!(event.src_port, None);
        assert_eq!(event.dst_port, None);
        assert_eq!(event.src_ip, "10.0.0.1");
    }

    #[test]
    fn ipv6_addresses_are_extracted() {
        let src = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let dst = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv6(src, dst, 64)
            .udp(1000, 2000);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[]).unwrap();

        let event = packet_event(ts(), frame.len() as i64, &frame).unwrap();
        assert_eq!(event.src_ip, "2001:db8::1");
        assert_eq!(event.dst_ip, "2001:db8::2");
    }

    #[test]
    fn truncated_frame_is_skipped_with_a_reason() {
        let result = packet_event(ts(), 5, &[0u8; 5]);
        assert_eq!(result.unwrap_err(), SkipReason::MalformedFrame);
    }

    #[test]
    fn missing_timestamp_is_preserved_not_rejected() {
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(1, 2);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[]).unwrap();

        // Dropping timestamp-less events is the resolver's job, not ours.
        let event = packet_event(None, frame.len() as i64, &frame).unwrap();
        assert!(event.timestamp.is_none());
    }
}
