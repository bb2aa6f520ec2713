//! Time-ordered identifier generation.
//!
//! Identifiers are 128-bit values laid out as a 48-bit Unix millisecond
//! timestamp, a 4-bit version tag, a 12-bit per-millisecond counter, a 2-bit
//! variant tag, and 62 bits of randomness. Two identifiers produced in the
//! same process sort strictly increasing, even within one millisecond, so
//! they serve as keyset-pagination sort keys without a database round-trip.

use rand::RngCore;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const VERSION: u128 = 0x7;
const VARIANT: u128 = 0b10;
const COUNTER_MAX: u16 = 0x0FFF;

struct GeneratorState {
    last_millis: u64,
    counter: u16,
}

static STATE: OnceLock<Mutex<GeneratorState>> = OnceLock::new();

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

/// Generate the next identifier as a hyphenated lowercase string.
///
/// Lexicographic order of the returned strings equals numeric order of the
/// underlying 128-bit values.
pub fn generate() -> String {
    let state = STATE.get_or_init(|| {
        Mutex::new(GeneratorState {
            last_millis: 0,
            counter: 0,
        })
    });

    let (millis, counter) = {
        let mut guard = state.lock().expect("id generator lock poisoned");
        let mut millis = now_millis();
        if millis == guard.last_millis {
            if guard.counter >= COUNTER_MAX {
                // Counter exhausted for this millisecond; wait for the next.
                while millis <= guard.last_millis {
                    std::hint::spin_loop();
                    millis = now_millis();
                }
                guard.last_millis = millis;
                guard.counter = 0;
            } else {
                guard.counter += 1;
            }
        } else {
            guard.last_millis = millis;
            guard.counter = 0;
        }
        (guard.last_millis, guard.counter)
    };

    let random62 = rand::thread_rng().next_u64() >> 2;

    let mut value: u128 = u128::from(millis & 0xFFFF_FFFF_FFFF) << 80;
    value |= VERSION << 76;
    value |= u128::from(counter & COUNTER_MAX) << 64;
    value |= VARIANT << 62;
    value |= u128::from(random62);

    Uuid::from_u128(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_hyphenated_uuid() {
        let id = generate();
        assert_eq!(id.len(), 36);
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let mut previous = generate();
        for _ in 0..5000 {
            let next = generate();
            assert!(next > previous, "{} !> {}", next, previous);
            previous = next;
        }
    }

    #[test]
    fn timestamp_prefix_matches_wall_clock() {
        let before = now_millis();
        let id = generate();
        let after = now_millis();

        let value = Uuid::parse_str(&id).unwrap().as_u128();
        let embedded = (value >> 80) as u64;
        assert!(embedded >= before && embedded <= after);
    }

    #[test]
    fn variant_bits_are_rfc_style() {
        let value = Uuid::parse_str(&generate()).unwrap().as_u128();
        assert_eq!((value >> 62) & 0b11, 0b10);
    }
}
