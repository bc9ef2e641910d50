use std::fmt::{self, Write};
use std::str::FromStr;

use serde_json::{json, Value};

use crate::bail;
use crate::errors::{PipelineError, Result};

pub type Point = (f64, f64);
pub type Ring = Vec<Point>;

/// Polygon given by its exterior ring followed by any holes.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Ring>,
}

/// Zone outlines as they appear in the taxi zone reference data.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    /// Parses `POLYGON` and `MULTIPOLYGON` well-known text. Keywords are case insensitive.
    pub fn from_wkt(wkt: &str) -> Result<Geometry> {
        let mut parser = WktParser { input: wkt.as_bytes(), pos: 0 };
        let geometry = parser.geometry()?;
        parser.skip_whitespace();
        if parser.pos != parser.input.len() {
            bail!(PipelineError::Geometry, "trailing characters at offset {} in {:?}", parser.pos, truncate(wkt));
        }
        Ok(geometry)
    }

    pub fn to_wkt(&self) -> String {
        let mut out = String::new();
        match self {
            Geometry::Polygon(polygon) => {
                out.push_str("POLYGON ");
                write_polygon(&mut out, polygon);
            }
            Geometry::MultiPolygon(polygons) => {
                out.push_str("MULTIPOLYGON (");
                for (i, polygon) in polygons.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_polygon(&mut out, polygon);
                }
                out.push(')');
            }
        }
        out
    }

    /// GeoJSON geometry object (RFC 7946 coordinate order: longitude, latitude).
    pub fn to_geojson(&self) -> Value {
        fn rings(polygon: &Polygon) -> Value {
            Value::Array(
                polygon
                    .rings
                    .iter()
                    .map(|ring| Value::Array(ring.iter().map(|&(x, y)| json!([x, y])).collect()))
                    .collect(),
            )
        }
        match self {
            Geometry::Polygon(polygon) => json!({
                "type": "Polygon",
                "coordinates": rings(polygon),
            }),
            Geometry::MultiPolygon(polygons) => json!({
                "type": "MultiPolygon",
                "coordinates": polygons.iter().map(rings).collect::<Vec<_>>(),
            }),
        }
    }
}

impl FromStr for Geometry {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Geometry> {
        Geometry::from_wkt(s)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

fn write_polygon(out: &mut String, polygon: &Polygon) {
    out.push('(');
    for (i, ring) in polygon.rings.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for (j, (x, y)) in ring.iter().enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{} {}", x, y);
        }
        out.push(')');
    }
    out.push(')');
}

fn truncate(s: &str) -> String {
    s.chars().take(40).collect()
}

struct WktParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> WktParser<'a> {
    fn geometry(&mut self) -> Result<Geometry> {
        let keyword = self.keyword();
        match keyword.as_str() {
            "POLYGON" => Ok(Geometry::Polygon(self.polygon()?)),
            "MULTIPOLYGON" => {
                let polygons = self.list(WktParser::polygon)?;
                Ok(Geometry::MultiPolygon(polygons))
            }
            "" => bail!(PipelineError::Geometry, "expected geometry type at offset {}", self.pos),
            other => bail!(PipelineError::Geometry, "unsupported geometry type {}", other),
        }
    }

    fn polygon(&mut self) -> Result<Polygon> {
        let rings = self.list(WktParser::ring)?;
        Ok(Polygon { rings })
    }

    fn ring(&mut self) -> Result<Ring> {
        let start = self.pos;
        let points = self.list(WktParser::point)?;
        if points.len() < 4 {
            bail!(PipelineError::Geometry, "ring at offset {} has {} points, need at least 4", start, points.len());
        }
        if points.first() != points.last() {
            bail!(PipelineError::Geometry, "ring at offset {} is not closed", start);
        }
        Ok(points)
    }

    fn point(&mut self) -> Result<Point> {
        let x = self.number()?;
        let y = self.number()?;
        Ok((x, y))
    }

    /// `( item, item, ... )`
    fn list<T>(&mut self, item: fn(&mut WktParser<'a>) -> Result<T>) -> Result<Vec<T>> {
        self.expect(b'(')?;
        let mut items = vec![item(self)?];
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    items.push(item(self)?);
                }
                Some(b')') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => bail!(PipelineError::Geometry, "expected `,` or `)` at offset {}", self.pos),
            }
        }
    }

    fn keyword(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().map_or(false, |c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).to_ascii_uppercase()
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E'))
        {
            self.pos += 1;
        }
        let token = String::from_utf8_lossy(&self.input[start..self.pos]);
        match token.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => bail!(PipelineError::Geometry, "expected coordinate at offset {}, found {:?}", start, token),
        }
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            bail!(PipelineError::Geometry, "expected `{}` at offset {}", c as char, self.pos)
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, |c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SQUARE: &str = "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))";

    #[test]
    fn test_parse_polygon() {
        let geometry = Geometry::from_wkt(SQUARE).unwrap();
        assert_eq!(
            geometry,
            Geometry::Polygon(Polygon {
                rings: vec![vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]],
            })
        );
        assert_eq!(geometry.to_wkt(), SQUARE);
    }

    #[test]
    fn test_parse_multipolygon() {
        let wkt = "multipolygon (((-74.18 40.64,-74.18 40.63,-74.17 40.63,-74.18 40.64)),\
                   ((-73.9 40.7, -73.8 40.7, -73.8 40.8, -73.9 40.7)))";
        let geometry = Geometry::from_wkt(wkt).unwrap();
        match &geometry {
            Geometry::MultiPolygon(polygons) => {
                assert_eq!(polygons.len(), 2);
                assert_eq!(polygons[0].rings[0][0], (-74.18, 40.64));
            }
            other => panic!("expected multipolygon, got {:?}", other),
        }
        assert_eq!(Geometry::from_wkt(&geometry.to_wkt()).unwrap(), geometry);
    }

    #[test]
    fn test_reject_invalid() {
        for wkt in [
            "",
            "POINT (1 2)",
            "POLYGON ((0 0, 1 0, 0 0))",
            "POLYGON ((0 0, 1 0, 1 1, 0 1))",
            "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0)",
            "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0)) junk",
            "POLYGON ((0 zero, 1 0, 1 1, 0 1, 0 0))",
        ] {
            assert!(Geometry::from_wkt(wkt).is_err(), "{:?} should not parse", wkt);
        }
    }

    #[test]
    fn test_geojson() {
        let geojson = Geometry::from_wkt(SQUARE).unwrap().to_geojson();
        assert_eq!(geojson["type"], "Polygon");
        assert_eq!(geojson["coordinates"][0][2], json!([1.0, 1.0]));
    }
}
