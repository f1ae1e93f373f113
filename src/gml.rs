//! WFS responses: GML feature collections and DescribeFeatureType schemas.

use serde_json::Map;

use crate::error::Result;
use crate::feature::{Feature, Geometry, Position};
use crate::interface::{AttrType, AttrTypes};
use crate::value::Value;
use crate::xml::{get_all_nodes_in_subtree, parse_xml_string, XmlNode};

/// Features of a `GetFeature` response plus the server side match count.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    /// `numberMatched` (WFS 2.0) or `numberOfFeatures` (WFS 1.1), if known.
    pub number_matched: Option<usize>,
}

pub fn parse_feature_collection(xml: &str) -> Result<FeatureCollection> {
    let nodes = parse_xml_string(xml)?;
    let root = match nodes.iter().find(|n| n.node_type == "FeatureCollection") {
        Some(s) => s,
        None => return Ok(FeatureCollection::default()),
    };

    let number_matched = root
        .attributes
        .get("numberMatched")
        .or_else(|| root.attributes.get("numberOfFeatures"))
        .and_then(|s| s.parse::<usize>().ok());

    let mut features = Vec::new();
    for member in root.children.iter() {
        match member.node_type.as_str() {
            "member" | "featureMember" | "featureMembers" => {
                features.extend(member.children.iter().map(xml_node_to_feature));
            }
            _ => continue,
        }
    }

    Ok(FeatureCollection {
        features,
        number_matched,
    })
}

fn xml_node_to_feature(node: &XmlNode) -> Feature {
    let id = node
        .attributes
        .get("id")
        .or_else(|| node.attributes.get("fid"))
        .map(|s| Value::String(s.clone()));

    let mut properties = Map::new();
    let mut geometry = None;

    for child in node.children.iter() {
        if child.is_leaf() {
            let value = match &child.text {
                Some(s) => Value::String(s.clone()),
                None => Value::Null,
            };
            properties.insert(child.node_type.clone(), value);
            continue;
        }
        if geometry.is_none() {
            geometry = child.children.first().and_then(parse_geometry);
        }
    }

    Feature {
        id,
        properties,
        geometry,
    }
}

fn numbers(node: &XmlNode) -> Vec<f64> {
    node.text
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

fn pos_list(node: &XmlNode) -> Vec<Position> {
    let dimension = node
        .attributes
        .get("srsDimension")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(2)
        .max(2);
    numbers(node)
        .chunks(dimension)
        .filter(|c| c.len() == dimension)
        .map(|c| c.to_vec())
        .collect()
}

fn single_pos(node: &XmlNode) -> Option<Position> {
    let n = numbers(node);
    if n.len() >= 2 {
        Some(n)
    } else {
        None
    }
}

// GML 2: "x,y x,y"
fn coordinates(node: &XmlNode) -> Vec<Position> {
    node.text
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|tuple| {
            let p = tuple
                .split(',')
                .filter_map(|s| s.parse::<f64>().ok())
                .collect::<Vec<_>>();
            if p.len() >= 2 {
                Some(p)
            } else {
                None
            }
        })
        .collect()
}

fn positions(node: &XmlNode) -> Vec<Position> {
    if let Some(pl) = node.first_child_of_type("posList") {
        return pos_list(pl);
    }
    if let Some(c) = node.first_child_of_type("coordinates") {
        return coordinates(c);
    }
    node.get_all_children_of_type("pos")
        .into_iter()
        .filter_map(single_pos)
        .collect()
}

/// Points of a line or ring, also for curves split into segments.
fn line_positions(node: &XmlNode) -> Vec<Position> {
    let direct = positions(node);
    if !direct.is_empty() {
        return direct;
    }
    let mut points = get_all_nodes_in_subtree(&node.children, "posList")
        .into_iter()
        .flat_map(pos_list)
        .collect::<Vec<_>>();
    points.dedup();
    points
}

fn polygon_rings(node: &XmlNode) -> Option<Vec<Vec<Position>>> {
    let mut exterior = None;
    let mut interiors = Vec::new();
    for c in node.children.iter() {
        let ring = match c.children.first() {
            Some(r) => line_positions(r),
            None => continue,
        };
        if ring.len() < 3 {
            continue;
        }
        match c.node_type.as_str() {
            "exterior" | "outerBoundaryIs" => exterior = Some(ring),
            "interior" | "innerBoundaryIs" => interiors.push(ring),
            _ => continue,
        }
    }
    let mut rings = vec![exterior?];
    rings.extend(interiors);
    Some(rings)
}

fn surface_polygons(node: &XmlNode) -> Vec<Vec<Vec<Position>>> {
    get_all_nodes_in_subtree(&node.children, "PolygonPatch")
        .into_iter()
        .filter_map(polygon_rings)
        .collect()
}

const MEMBER_TYPES: &[&str] = &[
    "pointMember",
    "pointMembers",
    "lineStringMember",
    "curveMember",
    "curveMembers",
    "polygonMember",
    "surfaceMember",
    "surfaceMembers",
];

fn member_geometries(node: &XmlNode) -> Vec<Geometry> {
    node.children
        .iter()
        .filter(|c| MEMBER_TYPES.contains(&c.node_type.as_str()))
        .flat_map(|m| m.children.iter().filter_map(parse_geometry))
        .collect()
}

/// Converts a GML geometry element into a GeoJSON geometry.
pub fn parse_geometry(node: &XmlNode) -> Option<Geometry> {
    match node.node_type.as_str() {
        "Point" => {
            let p = match node.first_child_of_type("pos") {
                Some(pos) => single_pos(pos),
                None => positions(node).into_iter().next(),
            };
            p.map(Geometry::Point)
        }
        "LineString" | "Curve" => {
            let l = line_positions(node);
            if l.len() < 2 {
                None
            } else {
                Some(Geometry::LineString(l))
            }
        }
        "Polygon" => polygon_rings(node).map(Geometry::Polygon),
        "Surface" => {
            let mut polygons = surface_polygons(node);
            match polygons.len() {
                0 => None,
                1 => polygons.pop().map(Geometry::Polygon),
                _ => Some(Geometry::MultiPolygon(polygons)),
            }
        }
        "MultiPoint" => Some(Geometry::MultiPoint(
            member_geometries(node)
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::Point(p) => Some(p),
                    _ => None,
                })
                .collect(),
        )),
        "MultiLineString" | "MultiCurve" => Some(Geometry::MultiLineString(
            member_geometries(node)
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::LineString(l) => vec![l],
                    Geometry::MultiLineString(ls) => ls,
                    _ => Vec::new(),
                })
                .collect(),
        )),
        "MultiPolygon" | "MultiSurface" => Some(Geometry::MultiPolygon(
            member_geometries(node)
                .into_iter()
                .flat_map(|g| match g {
                    Geometry::Polygon(p) => vec![p],
                    Geometry::MultiPolygon(ps) => ps,
                    _ => Vec::new(),
                })
                .collect(),
        )),
        _ => None,
    }
}

fn xsd_type(name: &str) -> Option<AttrType> {
    let local = name.rsplit(':').next().unwrap_or(name);
    if local.ends_with("PropertyType") {
        // geometry properties
        return None;
    }
    let t = match local {
        "int" | "integer" | "long" | "short" | "byte" | "decimal" | "double" | "float"
        | "nonNegativeInteger" | "positiveInteger" | "negativeInteger" | "nonPositiveInteger"
        | "unsignedInt" | "unsignedLong" | "unsignedShort" => AttrType::Number,
        "boolean" => AttrType::Boolean,
        "date" | "dateTime" | "time" => AttrType::Date,
        _ => AttrType::String,
    };
    Some(t)
}

/// Attribute types of a `DescribeFeatureType` schema.
pub fn parse_describe_feature_type(xml: &str) -> Result<AttrTypes> {
    let nodes = parse_xml_string(xml)?;
    let mut types = AttrTypes::new();
    for complex in get_all_nodes_in_subtree(&nodes, "complexType") {
        for element in get_all_nodes_in_subtree(&complex.children, "element") {
            let name = match element.attributes.get("name") {
                Some(s) => s,
                None => continue,
            };
            let type_name = element.attributes.get("type").cloned().or_else(|| {
                get_all_nodes_in_subtree(&element.children, "restriction")
                    .first()
                    .and_then(|r| r.attributes.get("base").cloned())
            });
            if let Some(t) = type_name.as_deref().and_then(xsd_type) {
                types.insert(name.clone(), t);
            }
        }
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLLECTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:de.hh.up="https://registry.gdi-de.org/id/de.hh.up" numberMatched="42" numberReturned="2">
  <wfs:member>
    <de.hh.up:schulen gml:id="APP_SCHULEN_1">
      <de.hh.up:schulname>Grundschule Nord</de.hh.up:schulname>
      <de.hh.up:schulform>Grundschule|Vorschule</de.hh.up:schulform>
      <de.hh.up:anzahl_schueler>312</de.hh.up:anzahl_schueler>
      <de.hh.up:bemerkung/>
      <de.hh.up:the_geom>
        <gml:Point srsName="urn:ogc:def:crs:EPSG::25832"><gml:pos>565000.1 5935000.2</gml:pos></gml:Point>
      </de.hh.up:the_geom>
    </de.hh.up:schulen>
  </wfs:member>
  <wfs:member>
    <de.hh.up:schulen gml:id="APP_SCHULEN_2">
      <de.hh.up:schulname>Stadtteilschule</de.hh.up:schulname>
      <de.hh.up:the_geom>
        <gml:Polygon>
          <gml:exterior><gml:LinearRing><gml:posList>0 0 10 0 10 10 0 10 0 0</gml:posList></gml:LinearRing></gml:exterior>
          <gml:interior><gml:LinearRing><gml:posList srsDimension="3">2 2 0 3 2 0 3 3 0 2 2 0</gml:posList></gml:LinearRing></gml:interior>
        </gml:Polygon>
      </de.hh.up:the_geom>
    </de.hh.up:schulen>
  </wfs:member>
</wfs:FeatureCollection>"#;

    #[test]
    fn parses_features_and_match_count() {
        let fc = parse_feature_collection(COLLECTION).unwrap();
        assert_eq!(fc.number_matched, Some(42));
        assert_eq!(fc.features.len(), 2);

        let first = &fc.features[0];
        assert_eq!(first.id, Some(json!("APP_SCHULEN_1")));
        assert_eq!(first.properties.get("schulname"), Some(&json!("Grundschule Nord")));
        assert_eq!(first.properties.get("anzahl_schueler"), Some(&json!("312")));
        assert_eq!(first.properties.get("bemerkung"), Some(&Value::Null));
        assert_eq!(first.geometry, Some(Geometry::Point(vec![565000.1, 5935000.2])));

        match &fc.features[1].geometry {
            Some(Geometry::Polygon(rings)) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[0].len(), 5);
                assert_eq!(rings[1][0], vec![2.0, 2.0, 0.0]);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn parses_gml2_and_multi_geometries() {
        let xml = r#"<wfs:FeatureCollection xmlns:gml="http://www.opengis.net/gml" numberOfFeatures="1">
  <gml:featureMember>
    <app:roads fid="roads.1">
      <app:name>B5</app:name>
      <app:geom>
        <gml:MultiLineString>
          <gml:lineStringMember><gml:LineString><gml:coordinates>0,0 1,1</gml:coordinates></gml:LineString></gml:lineStringMember>
          <gml:lineStringMember><gml:LineString><gml:coordinates>2,2 3,3 4,4</gml:coordinates></gml:LineString></gml:lineStringMember>
        </gml:MultiLineString>
      </app:geom>
    </app:roads>
  </gml:featureMember>
</wfs:FeatureCollection>"#;
        let fc = parse_feature_collection(xml).unwrap();
        assert_eq!(fc.number_matched, Some(1));
        assert_eq!(fc.features[0].id, Some(json!("roads.1")));
        match &fc.features[0].geometry {
            Some(Geometry::MultiLineString(lines)) => {
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[1].len(), 3);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn parses_surfaces_from_curve_segments() {
        let xml = r#"<gml:MultiSurface xmlns:gml="http://www.opengis.net/gml/3.2">
  <gml:surfaceMember>
    <gml:Surface><gml:patches><gml:PolygonPatch><gml:exterior><gml:Ring><gml:curveMember><gml:Curve><gml:segments>
      <gml:LineStringSegment><gml:posList>0 0 5 0 5 5</gml:posList></gml:LineStringSegment>
      <gml:LineStringSegment><gml:posList>5 5 0 5 0 0</gml:posList></gml:LineStringSegment>
    </gml:segments></gml:Curve></gml:curveMember></gml:Ring></gml:exterior></gml:PolygonPatch></gml:patches></gml:Surface>
  </gml:surfaceMember>
</gml:MultiSurface>"#;
        let nodes = parse_xml_string(xml).unwrap();
        match parse_geometry(&nodes[0]) {
            Some(Geometry::MultiPolygon(polys)) => {
                assert_eq!(polys.len(), 1);
                assert_eq!(polys[0][0].len(), 5);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn missing_collection_is_empty() {
        let fc = parse_feature_collection("<ows:ExceptionReport/>").unwrap();
        assert!(fc.features.is_empty());
        assert!(parse_feature_collection("<a><b></a>").is_err());
    }

    #[test]
    fn describe_feature_type() {
        let xsd = r#"<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:gml="http://www.opengis.net/gml/3.2">
  <xsd:element name="schulen" type="app:schulenType" substitutionGroup="gml:AbstractFeature"/>
  <xsd:complexType name="schulenType">
    <xsd:complexContent><xsd:extension base="gml:AbstractFeatureType"><xsd:sequence>
      <xsd:element name="schulname" type="xsd:string" minOccurs="0"/>
      <xsd:element name="anzahl_schueler" type="xsd:int" minOccurs="0"/>
      <xsd:element name="ganztag" type="xsd:boolean" minOccurs="0"/>
      <xsd:element name="gruendung" type="xsd:date" minOccurs="0"/>
      <xsd:element name="kosten"><xsd:simpleType><xsd:restriction base="xsd:decimal"/></xsd:simpleType></xsd:element>
      <xsd:element name="the_geom" type="gml:PointPropertyType" minOccurs="0"/>
    </xsd:sequence></xsd:extension></xsd:complexContent>
  </xsd:complexType>
</xsd:schema>"#;
        let types = parse_describe_feature_type(xsd).unwrap();
        assert_eq!(types.len(), 5);
        assert_eq!(types["schulname"], AttrType::String);
        assert_eq!(types["anzahl_schueler"], AttrType::Number);
        assert_eq!(types["ganztag"], AttrType::Boolean);
        assert_eq!(types["gruendung"], AttrType::Date);
        assert_eq!(types["kosten"], AttrType::Number);
        assert!(!types.contains_key("the_geom"));
    }
}
