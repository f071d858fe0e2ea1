use bpq_types::header::{Header, Target, MAX_ADJUSTMENT_FACTOR, TARGET_TIMESPAN_SECS};
use bpq_types::{H256, NetworkParams, U256};

use crate::error::{Error, Result};

/// Decodes a compact `bits` encoding into the full 256-bit target.
///
/// Unlike the lenient decoder miners display with, consensus restricts the
/// exponent to `[0x03, 0x1d]` and the mantissa to `[0x8000, 0x7fffff]`.
pub fn bits_to_target(bits: u32) -> Result<Target> {
    let exponent = (bits >> 24) & 0xff;
    if !(0x03..=0x1d).contains(&exponent) {
        return Err(Error::InvalidField("bits exponent"));
    }
    let base = bits & 0x00ff_ffff;
    if !(0x8000..=0x007f_ffff).contains(&base) {
        return Err(Error::InvalidField("bits mantissa"));
    }
    Ok(U256::from(base) << (8 * (exponent - 3)))
}

/// Computes the target for the chunk following the one bounded by `first`
/// and `last`: the previous target scaled by the observed timespan, clamped
/// to a factor of four and capped at the network maximum.
pub fn next_target(first: &Header, last: &Header, params: &NetworkParams) -> Result<Target> {
    let old_target = bits_to_target(last.bits)?;

    let actual_timespan = u64::from(last.time.saturating_sub(first.time)).clamp(
        TARGET_TIMESPAN_SECS / MAX_ADJUSTMENT_FACTOR,
        TARGET_TIMESPAN_SECS * MAX_ADJUSTMENT_FACTOR,
    );

    let (scaled, overflow) = old_target.overflowing_mul(actual_timespan);
    if overflow {
        return Ok(params.max_target);
    }
    let new_target = scaled / U256::from(TARGET_TIMESPAN_SECS);
    Ok(if new_target > params.max_target {
        params.max_target
    } else {
        new_target
    })
}

/// Checks linkage against `prev_hash` and, when a target is supplied, the
/// proof-of-work rule: the header must carry exactly the compact form of
/// the target and hash at or below it. Callers pass no target on networks
/// that run without proof of work.
pub fn verify_header(
    header: &Header,
    prev_hash: &H256,
    target: Option<&Target>,
    params: &NetworkParams,
) -> Result<()> {
    if header.prev_block_hash != *prev_hash {
        return Err(Error::Linkage {
            expected: prev_hash.clone(),
            found: header.prev_block_hash.clone(),
        });
    }

    let Some(target) = target else {
        return Ok(());
    };

    let expected_bits = target.target_to_bits();
    if expected_bits != header.bits {
        return Err(Error::BitsMismatch {
            expected: expected_bits,
            found: header.bits,
        });
    }

    let hash = header.block_hash(params)?;
    // The digest compares as a little-endian integer, i.e. big-endian in
    // the reversed display form.
    if U256::from_le_bytes(&hash.0) > *target {
        return Err(Error::PowNotMet { hash });
    }

    Ok(())
}
