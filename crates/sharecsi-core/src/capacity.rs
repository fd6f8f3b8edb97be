use crate::error::{CsiError, Result};
use crate::types::CapacityRange;

pub const GIB: i64 = 1024 * 1024 * 1024;

/// Share size used when the request carries no capacity range
pub const DEFAULT_SHARE_GIB: u64 = 100;

/// Parse a size string (e.g., "10Gi", "512Mi", "1Ti", "1073741824")
pub fn parse_quantity(s: &str) -> std::result::Result<i64, String> {
    let (num, factor) = if let Some(num) = s.strip_suffix("Ki") {
        (num, 1024)
    } else if let Some(num) = s.strip_suffix("Mi") {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix("Gi") {
        (num, GIB)
    } else if let Some(num) = s.strip_suffix("Ti") {
        (num, GIB * 1024)
    } else {
        (s, 1)
    };

    let value = num
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("Invalid quantity '{}': {}", s, e))?;
    value
        .checked_mul(factor)
        .ok_or_else(|| format!("Quantity '{}' overflows", s))
}

/// Largest quota a single share accepts
pub const MAX_SHARE_GIB: u64 = 100 * 1024;

/// Round a byte count up to whole GiB
pub fn bytes_to_gib_ceil(bytes: i64) -> u64 {
    if bytes <= 0 {
        return 0;
    }
    (bytes / GIB + i64::from(bytes % GIB != 0)) as u64
}

pub fn gib_to_bytes(gib: u64) -> i64 {
    i64::try_from(gib).unwrap_or(i64::MAX).saturating_mul(GIB)
}

fn check_range(range: &CapacityRange) -> Result<()> {
    if range.required_bytes < 0 || range.limit_bytes < 0 {
        return Err(CsiError::invalid_argument(
            "capacity range values must not be negative",
        ));
    }
    if range.limit_bytes > 0 && range.limit_bytes < range.required_bytes {
        return Err(CsiError::invalid_argument(format!(
            "capacity limit {} bytes is smaller than required {} bytes",
            range.limit_bytes, range.required_bytes
        )));
    }
    Ok(())
}

fn check_max(gib: u64) -> Result<u64> {
    if gib > MAX_SHARE_GIB {
        return Err(CsiError::invalid_argument(format!(
            "requested {} GiB exceeds the maximum share size of {} GiB",
            gib, MAX_SHARE_GIB
        )));
    }
    Ok(gib)
}

/// The size asked for by a range: required bytes, or the limit when no
/// minimum is given. Zero means the range names no size at all.
fn requested_gib(range: &CapacityRange) -> u64 {
    if range.required_bytes > 0 {
        bytes_to_gib_ceil(range.required_bytes)
    } else {
        bytes_to_gib_ceil(range.limit_bytes)
    }
}

/// Resolve a requested capacity range into a share quota in GiB.
///
/// A missing or zero range yields `default_gib`. The result is raised to
/// `min_gib`, and a limit below the required size is rejected.
pub fn resolve_share_gib(
    range: Option<&CapacityRange>,
    default_gib: u64,
    min_gib: u64,
) -> Result<u64> {
    let Some(range) = range else {
        return check_max(default_gib.max(min_gib));
    };
    check_range(range)?;

    let requested = match requested_gib(range) {
        0 => default_gib,
        gib => gib,
    };

    let gib = check_max(requested.max(min_gib))?;
    if range.limit_bytes > 0 && gib_to_bytes(gib) > range.limit_bytes {
        return Err(CsiError::invalid_argument(format!(
            "minimum share size {} GiB exceeds capacity limit {} bytes",
            gib, range.limit_bytes
        )));
    }
    Ok(gib)
}

/// Resolve the target quota of an expansion. Unlike creation there is no
/// default: a range without a size is rejected.
pub fn resolve_expand_gib(range: &CapacityRange) -> Result<u64> {
    check_range(range)?;
    match requested_gib(range) {
        0 => Err(CsiError::invalid_argument(
            "requested capacity must be positive",
        )),
        gib => check_max(gib),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1024").unwrap(), 1024);
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("10Gi").unwrap(), 10 * GIB);
        assert_eq!(parse_quantity("1Ti").unwrap(), 1024 * GIB);
        assert!(parse_quantity("ten").is_err());
    }

    #[test]
    fn test_bytes_round_up_to_gib() {
        assert_eq!(bytes_to_gib_ceil(0), 0);
        assert_eq!(bytes_to_gib_ceil(1), 1);
        assert_eq!(bytes_to_gib_ceil(GIB), 1);
        assert_eq!(bytes_to_gib_ceil(GIB + 1), 2);
        assert_eq!(bytes_to_gib_ceil(i64::MAX), (i64::MAX / GIB + 1) as u64);
        assert_eq!(bytes_to_gib_ceil(i64::MAX - i64::MAX % GIB), (i64::MAX / GIB) as u64);
        assert_eq!(gib_to_bytes(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_resolve_share_gib() {
        assert_eq!(resolve_share_gib(None, 100, 1).unwrap(), 100);

        let range = CapacityRange::required(5 * GIB + 10);
        assert_eq!(resolve_share_gib(Some(&range), 100, 1).unwrap(), 6);

        // premium minimum
        assert_eq!(resolve_share_gib(Some(&range), 100, 100).unwrap(), 100);
    }

    #[test]
    fn test_resolve_share_gib_rejects_bad_limits() {
        let range = CapacityRange {
            required_bytes: 10 * GIB,
            limit_bytes: 5 * GIB,
        };
        assert!(matches!(
            resolve_share_gib(Some(&range), 100, 1),
            Err(CsiError::InvalidArgument { .. })
        ));

        let range = CapacityRange {
            required_bytes: 10 * GIB,
            limit_bytes: 20 * GIB,
        };
        assert!(resolve_share_gib(Some(&range), 100, 100).is_err());
    }

    #[test]
    fn test_oversized_requests_are_rejected() {
        let huge = CapacityRange::required(i64::MAX);
        assert!(matches!(
            resolve_share_gib(Some(&huge), 100, 1),
            Err(CsiError::InvalidArgument { .. })
        ));
        assert!(matches!(
            resolve_expand_gib(&huge),
            Err(CsiError::InvalidArgument { .. })
        ));

        let at_max = CapacityRange::required(gib_to_bytes(MAX_SHARE_GIB));
        assert_eq!(resolve_share_gib(Some(&at_max), 100, 1).unwrap(), MAX_SHARE_GIB);
        assert_eq!(resolve_expand_gib(&at_max).unwrap(), MAX_SHARE_GIB);
    }

    #[test]
    fn test_resolve_expand_gib() {
        // the limit caps growth, it is not the target
        let range = CapacityRange {
            required_bytes: 20 * GIB,
            limit_bytes: 100 * GIB,
        };
        assert_eq!(resolve_expand_gib(&range).unwrap(), 20);

        let limit_only = CapacityRange {
            required_bytes: 0,
            limit_bytes: 30 * GIB,
        };
        assert_eq!(resolve_expand_gib(&limit_only).unwrap(), 30);

        for bad in [
            CapacityRange::default(),
            CapacityRange::required(-1),
            CapacityRange {
                required_bytes: 20 * GIB,
                limit_bytes: 10 * GIB,
            },
        ] {
            assert!(matches!(
                resolve_expand_gib(&bad),
                Err(CsiError::InvalidArgument { .. })
            ));
        }
    }
}
