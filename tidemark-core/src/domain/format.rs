// tidemark-core/src/domain/format.rs

/// Maximum rendered width of a profiling scalar.
pub const SCALAR_WIDTH: usize = 20;

/// `1234567` -> `"1,234,567"`.
pub fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Shortens long min/max values: anything past 20 chars keeps 17 plus `...`.
pub fn truncate_scalar(value: &str) -> String {
    if value.chars().count() <= SCALAR_WIDTH {
        return value.to_string();
    }
    let head: String = value.chars().take(SCALAR_WIDTH - 3).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_truncate_scalar() {
        assert_eq!(truncate_scalar("short"), "short");
        assert_eq!(truncate_scalar("exactly-twenty-chars"), "exactly-twenty-chars");
        assert_eq!(
            truncate_scalar("2024-01-01 00:00:00.000000 UTC"),
            "2024-01-01 00:00:..."
        );
        // multi-byte input is cut on char boundaries
        assert_eq!(truncate_scalar(&"é".repeat(25)).chars().count(), 20);
    }
}
