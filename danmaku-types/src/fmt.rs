/// Print a float as the shortest decimal that parses back to the same bits.
///
/// Tries 1 to 50 fractional digits and stops at the first representation
/// that survives a round trip through `str::parse`.
pub fn format_float(f: f32) -> String {
    let mut out = format!("{f:.1}");
    for digits in 1..50 {
        out = format!("{f:.digits$}");
        match out.parse::<f32>() {
            Ok(g) if g == f => break,
            _ => continue,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::format_float;

    #[test]
    fn integral_floats_keep_one_digit() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-3.0), "-3.0");
    }

    #[test]
    fn fractions_stop_at_the_shortest_exact_form() {
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(1.5), "1.5");
    }

    #[test]
    fn awkward_values_round_trip() {
        for f in [0.1f32, 1.0 / 3.0, std::f32::consts::PI, 1e-6, 12345.678] {
            let text = format_float(f);
            assert_eq!(text.parse::<f32>().unwrap(), f, "text was {text}");
        }
    }
}
