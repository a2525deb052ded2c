// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Synchronous reads and tolerated fence timeouts.

mod common;

use color_readback::{FramebufferFormats, PixelSize, ReadRequest, ReaderConfig, SlotState, TextureInfo};
use common::{Call, Script, harness, paint_coordinates};
use std::time::Duration;

#[test]
fn sync_read_flushes_without_touching_fences() {
    let script = Script {
        hold_fences: true,
        ..Script::default()
    };
    let mut h = harness::<2>(
        TextureInfo::new(4, 4, 4),
        FramebufferFormats::rgba8(),
        ReaderConfig::default(),
        script,
    );
    paint_coordinates(&h.framebuffer);

    //leaves a fence outstanding on slot 0
    h.reader
        .read_pixels(&ReadRequest::new(0, 0, 4, 4, PixelSize::Bits32))
        .unwrap();
    assert_eq!(h.reader.cursor(), Some(1));
    assert_eq!(h.reader.slot_state(0), SlotState::PendingGpu);
    h.take_calls();

    let request = ReadRequest::new(1, 2, 1, 1, PixelSize::Bits32).with_sync(true);
    let data = h.reader.read_pixels(&request).unwrap().to_vec();
    //this call's own data, not the previous one's
    assert_eq!(data, vec![1, 2, 3, 255]);
    assert_eq!(h.reader.cursor(), Some(1));
    assert_eq!(h.reader.slot_state(0), SlotState::PendingGpu);

    let calls = h.take_calls();
    assert_eq!(calls.last(), Some(&Call::Finish));
    assert!(!calls.iter().any(|c| matches!(
        c,
        Call::FenceSync(_) | Call::ClientWaitSync(..) | Call::DeleteSync(_)
    )));
}

#[test]
fn repeated_sync_reads_stay_on_one_slot() {
    let mut h = harness::<3>(
        TextureInfo::new(4, 4, 4),
        FramebufferFormats::rgba8(),
        ReaderConfig::default(),
        Script::default(),
    );
    let request = ReadRequest::new(0, 0, 4, 4, PixelSize::Bits32).with_sync(true);
    for _ in 0..4 {
        h.framebuffer.fill(|_, _| [9, 9, 9, 9]);
        assert!(h.reader.read_pixels(&request).unwrap().iter().all(|b| *b == 9));
        h.framebuffer.fill(|_, _| [0, 0, 0, 0]);
    }
    assert_eq!(h.reader.cursor(), Some(0));
    assert_eq!(h.live_fences(), 0);
}

#[test]
fn timed_out_wait_still_reads_the_slot() {
    let script = Script {
        hold_fences: true,
        ..Script::default()
    };
    let config = ReaderConfig::default().with_wait_timeout(Duration::from_millis(1));
    let mut h = harness::<2>(
        TextureInfo::new(2, 2, 4),
        FramebufferFormats::rgba8(),
        config,
        script,
    );
    h.framebuffer.fill(|_, _| [7, 7, 7, 7]);
    let request = ReadRequest::new(0, 0, 2, 2, PixelSize::Bits32);
    h.reader.read_pixels(&request).unwrap();
    let data = h.reader.read_pixels(&request).unwrap();
    assert!(data.iter().all(|b| *b == 7));

    //the timed-out fence was deleted and its slot freed
    assert_eq!(h.reader.cursor(), Some(0));
    assert_eq!(h.reader.slot_state(0), SlotState::Free);
    assert_eq!(h.live_fences(), 1);
    let calls = h.take_calls();
    let waited = calls.iter().find_map(|c| match c {
        Call::ClientWaitSync(fence, timeout) => Some((*fence, *timeout)),
        _ => None,
    });
    let (fence, timeout) = waited.expect("one wait");
    assert_eq!(timeout, Duration::from_millis(1));
    assert!(calls.contains(&Call::DeleteSync(fence)));
}
