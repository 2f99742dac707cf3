//! Property tests for the DOS time codec round-trip contract.

use proptest::prelude::*;

use zipstamp::{round_down_to_dos_quantum, DosTimeCodec, TimeZoneSpec};

/// 1980-01-01T00:00:00Z in epoch milliseconds.
const DOS_MIN_MS: i64 = 315_532_800_000;
/// 2107-12-31T23:59:59.999Z in epoch milliseconds.
const DOS_MAX_MS: i64 = 4_354_819_199_999;

/// One day of margin on each side so a shifted instant stays in range
/// for every offset the strategy produces.
const MARGIN_MS: i64 = 86_400_000;

proptest! {
    #[test]
    fn utc_round_trip_hits_the_quantum(t in DOS_MIN_MS..=DOS_MAX_MS) {
        let codec = DosTimeCodec::utc();
        let dos = codec.pack(t).unwrap();
        prop_assert_eq!(codec.unpack(dos), Some(round_down_to_dos_quantum(t)));
    }

    #[test]
    fn packing_is_stable_within_a_quantum(t in DOS_MIN_MS..=DOS_MAX_MS) {
        let codec = DosTimeCodec::utc();
        prop_assert_eq!(
            codec.pack(t).unwrap(),
            codec.pack(round_down_to_dos_quantum(t)).unwrap()
        );
    }

    #[test]
    fn fixed_offset_round_trip_hits_the_quantum(
        t in (DOS_MIN_MS + MARGIN_MS)..=(DOS_MAX_MS - MARGIN_MS),
        // Quarter-hour offsets from UTC-12:00 to UTC+14:00, the range
        // real zones occupy.
        quarter_hours in -48i32..=56,
    ) {
        let codec = DosTimeCodec::new(TimeZoneSpec::Fixed(quarter_hours * 900));
        let dos = codec.pack(t).unwrap();
        prop_assert_eq!(codec.unpack(dos), Some(round_down_to_dos_quantum(t)));
    }

    #[test]
    fn unpacked_values_stay_ordered(a in DOS_MIN_MS..=DOS_MAX_MS, b in DOS_MIN_MS..=DOS_MAX_MS) {
        let codec = DosTimeCodec::utc();
        let (da, db) = (codec.pack(a).unwrap(), codec.pack(b).unwrap());
        let (ua, ub) = (codec.unpack(da).unwrap(), codec.unpack(db).unwrap());
        if round_down_to_dos_quantum(a) <= round_down_to_dos_quantum(b) {
            prop_assert!(ua <= ub);
        }
    }
}
