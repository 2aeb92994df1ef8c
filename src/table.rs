use anyhow::{Context, Result, bail};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing, Shape};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Planar geometry of a single emissions source or receptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point {
        x: f64,
        y: f64,
    },
    /// The first ring is the shell; any further rings are holes.
    Polygon {
        rings: Vec<Vec<(f64, f64)>>,
    },
}

/// One geometry with its numeric attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry,
    pub attributes: BTreeMap<String, f64>,
}

impl Feature {
    pub fn new(geometry: Geometry, attributes: BTreeMap<String, f64>) -> Self {
        Self {
            geometry,
            attributes,
        }
    }
}

/// A geospatial attribute table: features plus their numeric columns.
///
/// Used both for the emissions submitted to a job and for the model output
/// read back from it. Only numeric attributes are carried; attribute names
/// are limited to 10 characters by the dBASE format underneath.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialTable {
    features: Vec<Feature>,
}

impl SpatialTable {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Attribute columns, sorted, as the union over all features.
    pub fn columns(&self) -> Vec<String> {
        let mut cols = BTreeSet::new();
        for f in &self.features {
            for name in f.attributes.keys() {
                cols.insert(name.clone());
            }
        }
        cols.into_iter().collect()
    }

    /// Writes the table as a shapefile (`.shp`/`.shx`/`.dbf`).
    ///
    /// All features must share one geometry kind; shapefiles cannot mix
    /// points and polygons in a single layer.
    pub fn to_shapefile(&self, path: &Path) -> Result<()> {
        let Some(first) = self.features.first() else {
            bail!("cannot write an empty dataset to {}", path.display());
        };

        let columns = self.columns();
        let mut builder = TableWriterBuilder::new();
        for c in &columns {
            let name = FieldName::try_from(c.as_str())
                .map_err(|e| anyhow::anyhow!("invalid attribute name `{c}`: {e:?}"))?;
            builder = builder.add_numeric_field(name, 18, 9);
        }

        match first.geometry {
            Geometry::Point { .. } => {
                let mut writer = shapefile::Writer::from_path(path, builder)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                for f in &self.features {
                    let Geometry::Point { x, y } = f.geometry else {
                        bail!("cannot mix point and polygon features in one shapefile");
                    };
                    writer.write_shape_and_record(&Point::new(x, y), &record_for(f, &columns))?;
                }
            }
            Geometry::Polygon { .. } => {
                let mut writer = shapefile::Writer::from_path(path, builder)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                for f in &self.features {
                    let Geometry::Polygon { rings } = &f.geometry else {
                        bail!("cannot mix point and polygon features in one shapefile");
                    };
                    writer
                        .write_shape_and_record(&polygon_shape(rings)?, &record_for(f, &columns))?;
                }
            }
        }

        Ok(())
    }

    /// Reads a shapefile back into a table.
    ///
    /// Non-numeric attribute fields are skipped; missing numeric values
    /// become NaN.
    pub fn from_shapefile(path: &Path) -> Result<Self> {
        let mut reader = shapefile::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut features = Vec::new();
        for pair in reader.iter_shapes_and_records() {
            let (shape, record) =
                pair.with_context(|| format!("failed to read {}", path.display()))?;
            let geometry = geometry_from_shape(shape, path)?;

            let mut attributes = BTreeMap::new();
            for (name, value) in record {
                let v = match value {
                    FieldValue::Numeric(v) => v.unwrap_or(f64::NAN),
                    FieldValue::Float(v) => v.map(f64::from).unwrap_or(f64::NAN),
                    FieldValue::Integer(v) => f64::from(v),
                    FieldValue::Double(v) => v,
                    FieldValue::Currency(v) => v,
                    _ => continue,
                };
                attributes.insert(name, v);
            }

            features.push(Feature {
                geometry,
                attributes,
            });
        }

        Ok(Self { features })
    }
}

fn record_for(feature: &Feature, columns: &[String]) -> Record {
    let mut record = Record::default();
    for c in columns {
        record.insert(
            c.clone(),
            FieldValue::Numeric(feature.attributes.get(c).copied()),
        );
    }
    record
}

fn polygon_shape(rings: &[Vec<(f64, f64)>]) -> Result<Polygon> {
    if rings.is_empty() || rings.iter().any(|r| r.len() < 3) {
        bail!("polygon features need at least one ring of 3 or more points");
    }

    let mut out = Vec::with_capacity(rings.len());
    for (i, ring) in rings.iter().enumerate() {
        let mut points: Vec<Point> = ring.iter().map(|&(x, y)| Point::new(x, y)).collect();
        if points.first() != points.last() {
            points.push(points[0]);
        }
        out.push(if i == 0 {
            PolygonRing::Outer(points)
        } else {
            PolygonRing::Inner(points)
        });
    }
    Ok(Polygon::with_rings(out))
}

fn geometry_from_shape(shape: Shape, path: &Path) -> Result<Geometry> {
    match shape {
        Shape::Point(p) => Ok(Geometry::Point { x: p.x, y: p.y }),
        Shape::PointM(p) => Ok(Geometry::Point { x: p.x, y: p.y }),
        Shape::PointZ(p) => Ok(Geometry::Point { x: p.x, y: p.y }),
        Shape::Polygon(p) => Ok(Geometry::Polygon {
            rings: p
                .rings()
                .iter()
                .map(|r| r.points().iter().map(|pt| (pt.x, pt.y)).collect())
                .collect(),
        }),
        _ => bail!("unsupported geometry in {}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v))
            .collect()
    }

    fn point_table() -> SpatialTable {
        SpatialTable::new(vec![
            Feature::new(
                Geometry::Point { x: -97.0, y: 32.0 },
                attrs(&[("PM2_5", 10.0), ("NOx", 2.5)]),
            ),
            Feature::new(
                Geometry::Point { x: -96.5, y: 32.1 },
                attrs(&[("PM2_5", 4.0), ("SOx", 1.0)]),
            ),
        ])
    }

    #[test]
    fn columns_are_the_sorted_union() {
        assert_eq!(point_table().columns(), vec!["NOx", "PM2_5", "SOx"]);
    }

    #[test]
    fn point_round_trip_preserves_count_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emis.shp");

        let table = point_table();
        table.to_shapefile(&path).unwrap();
        let back = SpatialTable::from_shapefile(&path).unwrap();

        assert_eq!(back.len(), table.len());
        assert_eq!(back.columns(), table.columns());
        let first = &back.features()[0];
        assert_eq!(first.geometry, Geometry::Point { x: -97.0, y: 32.0 });
        assert!((first.attributes["PM2_5"] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn polygon_round_trip_preserves_count_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.shp");

        let cell = |x0: f64, y0: f64, v: f64| {
            Feature::new(
                Geometry::Polygon {
                    rings: vec![vec![
                        (x0, y0),
                        (x0 + 1.0, y0),
                        (x0 + 1.0, y0 + 1.0),
                        (x0, y0 + 1.0),
                    ]],
                },
                attrs(&[("TotalPM25", v)]),
            )
        };
        let table = SpatialTable::new(vec![cell(0.0, 0.0, 1.5), cell(1.0, 0.0, 2.5)]);

        table.to_shapefile(&path).unwrap();
        let back = SpatialTable::from_shapefile(&path).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back.columns(), vec!["TotalPM25"]);
        assert!(matches!(
            back.features()[0].geometry,
            Geometry::Polygon { .. }
        ));
    }

    #[test]
    fn mixed_geometry_refuses_to_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.shp");

        let table = SpatialTable::new(vec![
            Feature::new(Geometry::Point { x: 0.0, y: 0.0 }, attrs(&[("NOx", 1.0)])),
            Feature::new(
                Geometry::Polygon {
                    rings: vec![vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]],
                },
                attrs(&[("NOx", 2.0)]),
            ),
        ]);

        assert!(table.to_shapefile(&path).is_err());
    }

    #[test]
    fn empty_table_refuses_to_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpatialTable::default()
            .to_shapefile(&dir.path().join("empty.shp"))
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
