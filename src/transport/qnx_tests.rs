use std::mem::{offset_of, size_of};

use super::*;

#[test]
fn msg_info_matches_kernel_layout() {
    assert_eq!(size_of::<MsgInfo>(), 48);
    assert_eq!(offset_of!(MsgInfo, msglen), 28);
    assert_eq!(offset_of!(MsgInfo, priority), 40);
}
