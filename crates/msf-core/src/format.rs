const UNITS: [(&str, u64); 5] = [
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("B", 1),
];

/// Human-readable byte count using 1024-based units, e.g. `4 KB` or `1.50 MB`.
pub fn size_format(bytes: u64, decimals: usize) -> String {
    for (unit, magnitude) in UNITS {
        if bytes >= magnitude {
            let scaled = bytes as f64 / magnitude as f64;
            return format!("{scaled:.decimals$} {unit}");
        }
    }
    format!("{:.decimals$} B", 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_fitting_unit() {
        assert_eq!(size_format(0, 0), "0 B");
        assert_eq!(size_format(120, 0), "120 B");
        assert_eq!(size_format(4096, 0), "4 KB");
        assert_eq!(size_format(1_572_864, 2), "1.50 MB");
        assert_eq!(size_format(3 << 30, 0), "3 GB");
        assert_eq!(size_format(1023, 0), "1023 B");
    }
}
