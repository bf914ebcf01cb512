//! Line numbering properties of the Marlin framing

use bambulink_communication::communication::{frame, Inbound, LineProtocol, Rejection};
use bambulink_core::ProtocolError;
use proptest::prelude::*;

fn resend_requests(inbound: &[Inbound]) -> Vec<u32> {
    inbound
        .iter()
        .filter_map(|i| match i {
            Inbound::Rejected(Rejection {
                resend: Some(line), ..
            }) => Some(*line),
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn consecutive_lines_never_request_resend(start in 0u32..10_000, count in 1usize..200) {
        let mut protocol = LineProtocol::new();
        protocol.accept(&format!("M110 N{}", start));

        let inbound: Vec<Inbound> = (1..=count as u32)
            .map(|offset| protocol.accept(&frame(start + offset, "M105")))
            .collect();

        prop_assert!(resend_requests(&inbound).is_empty());
        prop_assert_eq!(protocol.last_line(), start + count as u32);
    }

    #[test]
    fn a_gap_requests_exactly_one_resend(
        before in 1u32..50,
        skipped in 1u32..10,
        after in 1u32..50,
    ) {
        let mut protocol = LineProtocol::new();
        let mut inbound = Vec::new();

        for n in 1..=before {
            inbound.push(protocol.accept(&frame(n, "M105")));
        }
        let resume = before + skipped + 1;
        for n in resume..resume + after {
            inbound.push(protocol.accept(&frame(n, "M105")));
        }

        prop_assert_eq!(resend_requests(&inbound), vec![before + 1]);
        prop_assert_eq!(protocol.resend_pending(), Some(before + 1));

        // The requested line is accepted and clears the request
        let replay = protocol.accept(&frame(before + 1, "M105"));
        prop_assert!(matches!(replay, Inbound::Command(_)), "replay not accepted");
        prop_assert_eq!(protocol.resend_pending(), None);
    }

    #[test]
    fn corrupted_checksum_is_rejected(n in 1u32..1000, delta in 1u8..=255) {
        let framed = frame(n, "G1 X10 Y10");
        let (body, sum) = framed.rsplit_once('*').unwrap();
        let bad = sum.parse::<u8>().unwrap().wrapping_add(delta);

        let mut protocol = LineProtocol::new();
        protocol.accept(&format!("M110 N{}", n - 1));
        let inbound = protocol.accept(&format!("{}*{}", body, bad));

        prop_assert_eq!(
            inbound,
            Inbound::Rejected(Rejection {
                error: ProtocolError::ChecksumMismatch { last_line: n - 1 },
                resend: Some(n),
            })
        );
    }
}
