//! Minimal NMEA 0183 support for the position fixes carried in the `Nmea` dataset.
use tracing::debug;

/// A GGA position fix in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Verify the `*hh` checksum if the sentence has one.
fn checksum_ok(sentence: &str) -> bool {
    let body = sentence.trim_start_matches('$');
    let Some((data, sum)) = body.split_once('*') else {
        return true;
    };
    let Ok(expected) = u8::from_str_radix(sum.trim(), 16) else {
        return false;
    };
    data.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed decimal degrees.
fn coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if !value.is_ascii() {
        return None;
    }
    let degrees: f64 = value.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = value.get(degree_digits..)?.parse().ok()?;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

/// Parse a single `$--GGA` sentence.
#[must_use]
pub fn parse_gga(sentence: &str) -> Option<Fix> {
    let sentence = sentence.trim();
    if !sentence.starts_with('$') || !checksum_ok(sentence) {
        return None;
    }
    let data = sentence
        .split_once('*')
        .map_or(sentence, |(data, _)| data);
    let fields: Vec<&str> = data.split(',').collect();
    if fields.len() < 7 || !fields[0].ends_with("GGA") {
        return None;
    }
    // Fix quality 0 is "invalid"
    if fields[6] == "0" {
        return None;
    }
    Some(Fix {
        latitude: coordinate(fields[2], fields[3], 2)?,
        longitude: coordinate(fields[4], fields[5], 3)?,
    })
}

/// The last valid GGA fix in a block of NMEA text.
#[must_use]
pub fn last_fix(text: &[u8]) -> Option<Fix> {
    let text = String::from_utf8_lossy(text);
    let fix = text
        .split(|c: char| c.is_whitespace() || c == '\0')
        .filter_map(parse_gga)
        .last();
    if fix.is_none() && !text.trim_matches('\0').trim().is_empty() {
        debug!("no valid GGA sentence in NMEA dataset");
    }
    fix
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn parse_gga_sentence() {
        let fix = parse_gga(GGA).unwrap();
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.longitude - 11.516_666).abs() < 1e-4);
    }

    #[test]
    fn parse_gga_southern_western() {
        let fix = parse_gga("$GNGGA,000000,4530.000,S,06400.000,W,1,08,0.9,0,M,0,M,,").unwrap();
        assert_eq!(fix.latitude, -45.5);
        assert_eq!(fix.longitude, -64.0);
    }

    #[test]
    fn bad_checksum_rejected() {
        let bad = GGA.replace("*47", "*48");
        assert!(parse_gga(&bad).is_none());
    }

    #[test]
    fn invalid_fix_quality_rejected() {
        assert!(parse_gga("$GPGGA,123519,4807.038,N,01131.000,E,0,08,0.9,545.4,M,46.9,M,,").is_none());
    }

    #[test]
    fn last_fix_in_block() {
        let text = format!(
            "$GPVTG,054.7,T,034.4,M,005.5,N,010.2,K*48\r\n{GGA}\r\n$GPGGA,000000,4530.000,N,06400.000,W,1,08,0.9,0,M,0,M,,\r\n\0\0"
        );
        let fix = last_fix(text.as_bytes()).unwrap();
        assert_eq!(fix.latitude, 45.5);
        assert!(last_fix(b"\0\0\0").is_none());
    }

    #[test]
    fn non_ascii_coordinate_is_discarded() {
        let mut text = b"$GPGGA,000000,45".to_vec();
        text.push(0xFF);
        text.extend_from_slice(b"30.000,N,06400.000,W,1,08,0.9,0,M,0,M,,\r\n");
        assert!(last_fix(&text).is_none());

        // Multi-byte character right at the degree boundary
        assert!(parse_gga("$GPGGA,000000,4\u{e9}30.000,N,06400.000,W,1,08,0.9,0,M,0,M,,").is_none());
        assert!(parse_gga("$GPGGA,000000,45,N,06400.000,W,1,08,0.9,0,M,0,M,,").is_none());
    }
}
