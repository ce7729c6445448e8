pub(crate) fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

/// Rec. 709 luma of an 8-bit RGB triple, in 8.8 fixed point (weights sum to 256).
pub(crate) fn luma_u8(r: u8, g: u8, b: u8) -> u8 {
    ((54 * u32::from(r) + 183 * u32::from(g) + 19 * u32::from(b) + 128) >> 8) as u8
}

pub(crate) fn unpremultiply_u8(c: u8, a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    ((u32::from(c) * 255 + u32::from(a) / 2) / u32::from(a)).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_endpoints_are_exact() {
        assert_eq!(luma_u8(0, 0, 0), 0);
        assert_eq!(luma_u8(255, 255, 255), 255);
        assert!(luma_u8(0, 255, 0) > luma_u8(255, 0, 0));
        assert!(luma_u8(255, 0, 0) > luma_u8(0, 0, 255));
    }

    #[test]
    fn unpremultiply_inverts_mul_div255() {
        for a in [1u8, 64, 128, 200, 255] {
            for c in [0u8, 17, 128, 255] {
                let premul = mul_div255(u16::from(c), u16::from(a)) as u8;
                let back = unpremultiply_u8(premul, a);
                assert!((i16::from(back) - i16::from(c)).abs() <= (255 / i16::from(a)) + 1);
            }
        }
        assert_eq!(unpremultiply_u8(10, 0), 0);
    }
}
