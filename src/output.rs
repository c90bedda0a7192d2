//! Tab-separated atlas output.

use std::io::{self, Write};

use crate::aggregate::Aggregation;
use crate::manifest::Manifest;

/// Writes the joined atlas: every original manifest column plus `x` and `y`.
///
/// Rows appear in manifest order. Rows without coordinates (possible only
/// under the null-fill policy) get empty `x`/`y` cells. Returns the number of
/// data rows written.
pub fn write_atlas<W: Write>(
    writer: &mut W,
    manifest: &Manifest,
    aggregation: &Aggregation,
) -> io::Result<usize> {
    let mut header = manifest.columns().join("\t");
    header.push_str("\tx\ty\n");
    writer.write_all(header.as_bytes())?;

    let mut written = 0usize;
    for row in &aggregation.rows {
        let record = &manifest.records()[row.index];
        let mut line = record.fields.join("\t");
        match row.point {
            Some(point) => {
                line.push_str(&format!("\t{}\t{}\n", point.x, point.y));
            }
            None => line.push_str("\t\t\n"),
        }
        writer.write_all(line.as_bytes())?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MapRow;
    use crate::embed::PlanePoint;
    use pretty_assertions::assert_eq;

    #[test]
    fn appends_coordinates_and_null_fills_absent_rows() {
        let manifest = Manifest::parse(b"id\ttitle\n1\tbowl\n2\tamulet\n").unwrap();
        let aggregation = Aggregation {
            rows: vec![
                MapRow {
                    index: 0,
                    point: Some(PlanePoint { x: 1.5, y: -2.0 }),
                },
                MapRow {
                    index: 1,
                    point: None,
                },
            ],
            fetch_failed: 1,
            featurize_failed: 0,
            unmatched: 0,
            embedded: 1,
        };

        let mut out = Vec::new();
        let written = write_atlas(&mut out, &manifest, &aggregation).unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id\ttitle\tx\ty\n1\tbowl\t1.5\t-2\n2\tamulet\t\t\n"
        );
    }
}
