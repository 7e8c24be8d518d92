//! Framing Property Tests
//!
//! However the stream is cut into reads, the decoder must release exactly
//! the frames that were written, in order, and nothing else.

use bytes::BytesMut;
use codec::{encode_frame_into, FrameDecoder, ProtocolError};
use proptest::prelude::*;

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..16)
}

/// Split `wire` at the given (unsorted, possibly duplicate) cut points
fn chunk(wire: &[u8], mut cuts: Vec<usize>) -> Vec<&[u8]> {
    cuts.iter_mut().for_each(|c| *c %= wire.len() + 1);
    cuts.sort_unstable();
    cuts.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(&wire[start..cut]);
        start = cut;
    }
    chunks.push(&wire[start..]);
    chunks
}

proptest! {
    #[test]
    fn frames_survive_arbitrary_chunking(
        frames in payloads(),
        cuts in prop::collection::vec(any::<usize>(), 0..24),
    ) {
        let mut wire = BytesMut::new();
        for frame in &frames {
            encode_frame_into(frame, &mut wire);
        }

        let mut decoder = FrameDecoder::default();
        let mut released = Vec::new();
        for piece in chunk(&wire, cuts) {
            released.extend(decoder.decode(piece).unwrap());
        }

        prop_assert_eq!(released.len(), frames.len());
        for (got, want) in released.iter().zip(&frames) {
            prop_assert_eq!(&got[..], &want[..]);
        }
        prop_assert_eq!(decoder.pending_bytes(), 0);
        prop_assert_eq!(decoder.expected_len(), None);
    }

    #[test]
    fn incomplete_tail_is_never_released(
        frame in prop::collection::vec(any::<u8>(), 1..256),
        keep in 0usize..256,
    ) {
        let mut wire = BytesMut::new();
        encode_frame_into(&frame, &mut wire);
        let keep = keep % wire.len();

        let mut decoder = FrameDecoder::default();
        prop_assert!(decoder.decode(&wire[..keep]).unwrap().is_empty());
        prop_assert_eq!(decoder.decode(&wire[keep..]).unwrap().len(), 1);
    }

    #[test]
    fn oversized_headers_always_rejected(excess in 1u32..1_000_000) {
        let max = 1024usize;
        let declared = max as u32 + excess;
        let mut decoder = FrameDecoder::new(max);

        let err = decoder.decode(&declared.to_be_bytes()).unwrap_err();
        let is_frame_too_large = matches!(err, ProtocolError::FrameTooLarge { .. });
        prop_assert!(is_frame_too_large);
        prop_assert_eq!(decoder.pending_bytes(), 0);
    }
}
