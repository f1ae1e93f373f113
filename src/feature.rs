//! Features and the map side the filter depends on.

use std::cell::RefCell;
use std::collections::BTreeMap;

use geo::Intersects;
use serde_derive::{Deserialize, Serialize};
use serde_json::Map;

use crate::value::{AttributeSource, Value};

/// One coordinate tuple, `[x, y]` or `[x, y, z]`.
pub type Position = Vec<f64>;

/// GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

fn coord(p: &Position) -> Option<geo::Coord<f64>> {
    match p.as_slice() {
        [x, y, ..] => Some(geo::Coord { x: *x, y: *y }),
        _ => None,
    }
}

fn line(points: &[Position]) -> geo::LineString<f64> {
    geo::LineString::new(points.iter().filter_map(coord).collect())
}

fn polygon(rings: &[Vec<Position>]) -> Option<geo::Polygon<f64>> {
    let (exterior, interiors) = rings.split_first()?;
    Some(geo::Polygon::new(
        line(exterior),
        interiors.iter().map(|r| line(r)).collect(),
    ))
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    pub fn to_geo(&self) -> Option<geo::Geometry<f64>> {
        let g = match self {
            Geometry::Point(p) => geo::Geometry::Point(geo::Point(coord(p)?)),
            Geometry::MultiPoint(ps) => geo::Geometry::MultiPoint(geo::MultiPoint::new(
                ps.iter().filter_map(coord).map(geo::Point).collect(),
            )),
            Geometry::LineString(l) => geo::Geometry::LineString(line(l)),
            Geometry::MultiLineString(ls) => geo::Geometry::MultiLineString(geo::MultiLineString::new(
                ls.iter().map(|l| line(l)).collect(),
            )),
            Geometry::Polygon(rings) => geo::Geometry::Polygon(polygon(rings)?),
            Geometry::MultiPolygon(polys) => geo::Geometry::MultiPolygon(geo::MultiPolygon::new(
                polys.iter().filter_map(|p| polygon(p)).collect(),
            )),
        };
        Some(g)
    }
}

/// A map feature as the filter sees it: attributes plus an optional geometry.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

impl Feature {
    pub fn new(properties: Map<String, Value>) -> Self {
        Self {
            id: None,
            properties,
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

impl AttributeSource for Feature {
    fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Returns `true` if the feature geometry intersects `geometry`.
/// Features without a geometry never do.
pub fn feature_intersects(feature: &Feature, geometry: &Geometry) -> bool {
    let a = match feature.geometry.as_ref().and_then(|g| g.to_geo()) {
        Some(s) => s,
        None => return false,
    };
    match geometry.to_geo() {
        Some(b) => a.intersects(&b),
        None => false,
    }
}

/// The map the filter runs against: loaded layers and spatial checks.
pub trait FeatureProvider {
    fn get_features_by_layer_id(&self, layer_id: &str) -> Vec<Feature>;

    fn is_feature_in_map_extent(&self, feature: &Feature) -> bool;

    fn is_feature_in_geometry(&self, feature: &Feature, geometry: &Geometry) -> bool {
        feature_intersects(feature, geometry)
    }
}

/// Map extent as `[min_x, min_y, max_x, max_y]`.
pub type Extent = [f64; 4];

/// [`FeatureProvider`] holding layers in memory, fed by the JS side.
#[derive(Debug, Default)]
pub struct InMemoryFeatureProvider {
    layers: RefCell<BTreeMap<String, Vec<Feature>>>,
    extent: RefCell<Option<Extent>>,
}

impl InMemoryFeatureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_layer_features(&self, layer_id: &str, features: Vec<Feature>) {
        self.layers.borrow_mut().insert(layer_id.to_string(), features);
    }

    pub fn remove_layer(&self, layer_id: &str) {
        self.layers.borrow_mut().remove(layer_id);
    }

    /// `None` disables the extent check.
    pub fn set_map_extent(&self, extent: Option<Extent>) {
        *self.extent.borrow_mut() = extent;
    }
}

impl FeatureProvider for InMemoryFeatureProvider {
    fn get_features_by_layer_id(&self, layer_id: &str) -> Vec<Feature> {
        self.layers.borrow().get(layer_id).cloned().unwrap_or_default()
    }

    fn is_feature_in_map_extent(&self, feature: &Feature) -> bool {
        let [min_x, min_y, max_x, max_y] = match *self.extent.borrow() {
            Some(e) => e,
            None => return true,
        };
        let rect = geo::Rect::new(
            geo::Coord { x: min_x, y: min_y },
            geo::Coord { x: max_x, y: max_y },
        );
        match feature.geometry.as_ref().and_then(|g| g.to_geo()) {
            Some(g) => g.intersects(&geo::Geometry::Rect(rect)),
            None => false,
        }
    }
}
