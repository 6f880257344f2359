// vim: tw=80
use std::collections::HashMap;

use ocssd_core::geometry::*;
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

/// Distinct in-range legacy addresses never share a device address, and every
/// translation can be undone
#[test]
fn translation_sweep() {
    let geo = Geometry::new(4, 8, 64, 4096, 4096, 16)
        .with_planes(2)
        .with_sectors_per_page(4);
    geo.validate().unwrap();
    let mut rng = XorShiftRng::seed_from_u64(0x0c55d);
    let mut seen = HashMap::new();
    for _ in 0..20_000 {
        let l = LegacyAddr::new(
            rng.gen_range(0..geo.nchannels()),
            rng.gen_range(0..geo.nluns()),
            rng.gen_range(0..geo.nplanes),
            rng.gen_range(0..geo.nblocks()),
            rng.gen_range(0..geo.npages()),
            rng.gen_range(0..geo.nsectors)
        );
        geo.check_legacy(l).unwrap();
        let n = geo.to_native(l);
        let d = geo.to_device(l);
        assert_eq!(d, geo.to_device(n));
        assert_eq!(geo.from_device(d), n);
        assert_eq!(geo.to_legacy(n), l);
        if let Some(prev) = seen.insert(d, l) {
            assert_eq!(prev, l, "{} and {} collide at {}", prev, l, d);
        }
    }
}

#[test]
fn end_to_end_example() {
    let geo = crate::geo();
    let l = LegacyAddr::new(1, 0, 0, 3, 0, 0);
    assert_eq!(geo.to_native(l), NativeAddr::new(1, 0, 3, 0));
}
