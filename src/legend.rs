//! Legend icons of filtered layers, as image urls or SVG data urls.

use std::collections::BTreeMap;

use base64::Engine;
use serde_derive::{Deserialize, Serialize};

/// Color as written in style files: CSS string or `[r, g, b, a]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleColor {
    Css(String),
    Rgba(Vec<f64>),
}

impl StyleColor {
    /// Normalized `rgba(r, g, b, a)` string, `None` for unreadable colors.
    pub fn to_css(&self) -> Option<String> {
        let color = match self {
            StyleColor::Css(s) => csscolorparser::parse(s).ok()?,
            StyleColor::Rgba(v) => {
                let channel = |i: usize| v.get(i).map(|c| c.clamp(0.0, 255.0).round() as u8);
                let alpha = v.get(3).copied().unwrap_or(1.0).clamp(0.0, 1.0);
                let [r, g, b] = [channel(0)?, channel(1)?, channel(2)?];
                csscolorparser::Color::from_rgba8(r, g, b, (alpha * 255.0).round() as u8)
            }
        };
        let [r, g, b, _] = color.to_rgba8();
        let a = (color.a * 100.0).round() / 100.0;
        Some(format!("rgba({r}, {g}, {b}, {a})"))
    }
}

fn css_or(color: &Option<StyleColor>, fallback: &str) -> String {
    color
        .as_ref()
        .and_then(|c| c.to_css())
        .unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HatchStyle {
    pub pattern: Option<String>,
    pub size: Option<f64>,
    pub line_width: Option<f64>,
    pub background_color: Option<StyleColor>,
    pub pattern_color: Option<StyleColor>,
}

/// Legend relevant parts of a style rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegendStyle {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub image_path: Option<String>,
    pub image_name: Option<String>,

    pub circle_radius: Option<f64>,
    pub circle_fill_color: Option<StyleColor>,
    pub circle_stroke_color: Option<StyleColor>,
    pub circle_stroke_width: Option<f64>,

    pub line_stroke_color: Option<StyleColor>,
    pub line_stroke_width: Option<f64>,
    pub line_stroke_dash: Option<Vec<f64>>,

    pub polygon_fill_color: Option<StyleColor>,
    pub polygon_stroke_color: Option<StyleColor>,
    pub polygon_stroke_width: Option<f64>,
    pub polygon_fill_hatch: Option<HatchStyle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    pub label: String,
    #[serde(default)]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub style: LegendStyle,
}

/// Fill of hatched polygons, provided by the style side.
pub trait HatchPattern {
    /// SVG `<pattern>` element with the given id.
    fn pattern(&self, id: &str, hatch: &HatchStyle) -> String;
}

/// Diagonal lines on a background color.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagonalHatch;

impl HatchPattern for DiagonalHatch {
    fn pattern(&self, id: &str, hatch: &HatchStyle) -> String {
        let size = hatch.size.unwrap_or(10.0);
        let line_width = hatch.line_width.unwrap_or(2.0);
        let background = css_or(&hatch.background_color, "rgba(255, 255, 255, 1)");
        let color = css_or(&hatch.pattern_color, "rgba(0, 0, 0, 1)");
        let rotate = match hatch.pattern.as_deref() {
            Some("diagonal-right") => -45,
            Some("vertical") => 0,
            Some("horizontal") => 90,
            _ => 45,
        };
        format!(
            "<pattern id='{id}' patternUnits='userSpaceOnUse' width='{size}' height='{size}' patternTransform='rotate({rotate})'>\
             <rect width='{size}' height='{size}' fill='{background}'/>\
             <line x1='0' y1='0' x2='0' y2='{size}' stroke='{color}' stroke-width='{line_width}'/>\
             </pattern>"
        )
    }
}

fn svg_data_url(svg: &str) -> String {
    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg)
    )
}

pub fn create_circle_svg(style: &LegendStyle) -> String {
    let radius = style.circle_radius.unwrap_or(10.0);
    let stroke_width = style.circle_stroke_width.unwrap_or(2.0);
    let size = (radius + stroke_width) * 2.0;
    let center = size / 2.0;
    let fill = css_or(&style.circle_fill_color, "rgba(0, 153, 255, 1)");
    let stroke = css_or(&style.circle_stroke_color, "rgba(0, 0, 0, 1)");
    format!(
        "<svg height='{size}' width='{size}' version='1.1' xmlns='http://www.w3.org/2000/svg'>\
         <circle cx='{center}' cy='{center}' r='{radius}' stroke='{stroke}' stroke-width='{stroke_width}' fill='{fill}'/>\
         </svg>"
    )
}

pub fn create_line_svg(style: &LegendStyle) -> String {
    let stroke = css_or(&style.line_stroke_color, "rgba(0, 0, 0, 1)");
    let stroke_width = style.line_stroke_width.unwrap_or(1.0);
    let dash = match &style.line_stroke_dash {
        Some(d) if !d.is_empty() => format!(
            " stroke-dasharray='{}'",
            d.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
        ),
        _ => String::new(),
    };
    format!(
        "<svg height='35' width='35' version='1.1' xmlns='http://www.w3.org/2000/svg'>\
         <path d='M 05 30 L 30 05' stroke='{stroke}' stroke-width='{stroke_width}' fill='none'{dash}/>\
         </svg>"
    )
}

pub fn create_polygon_svg(style: &LegendStyle, hatch: &dyn HatchPattern) -> String {
    let stroke = css_or(&style.polygon_stroke_color, "rgba(0, 0, 0, 1)");
    let stroke_width = style.polygon_stroke_width.unwrap_or(1.0);
    let (defs, fill) = match &style.polygon_fill_hatch {
        Some(h) => (
            format!("<defs>{}</defs>", hatch.pattern("hatch", h)),
            "url(#hatch)".to_string(),
        ),
        None => (
            String::new(),
            css_or(&style.polygon_fill_color, "rgba(10, 200, 100, 0.5)"),
        ),
    };
    format!(
        "<svg height='35' width='35' version='1.1' xmlns='http://www.w3.org/2000/svg'>{defs}\
         <polygon points='5,5 30,5 30,30 5,30' style='fill:{fill};stroke:{stroke};stroke-width:{stroke_width}'/>\
         </svg>"
    )
}

fn icon_url(style: &LegendStyle) -> Option<String> {
    let name = style.image_name.as_deref()?;
    if name.starts_with("http") || name.starts_with("data:") || name.starts_with('/') {
        return Some(name.to_string());
    }
    match style.image_path.as_deref() {
        Some(path) if !path.is_empty() => Some(format!("{}/{}", path.trim_end_matches('/'), name)),
        _ => Some(name.to_string()),
    }
}

/// `label -> icon` for every legend entry with a drawable style.
pub fn get_icon_list_from_legend(legend: &[LegendEntry], hatch: &dyn HatchPattern) -> BTreeMap<String, String> {
    let mut icons = BTreeMap::new();
    for entry in legend {
        let style = &entry.style;
        let icon = if style.kind.as_deref() == Some("icon") {
            icon_url(style)
        } else {
            match entry.geometry_type.as_deref() {
                Some("Point") | Some("MultiPoint") => Some(svg_data_url(&create_circle_svg(style))),
                Some("LineString") | Some("MultiLineString") => Some(svg_data_url(&create_line_svg(style))),
                Some("Polygon") | Some("MultiPolygon") => Some(svg_data_url(&create_polygon_svg(style, hatch))),
                _ => None,
            }
        };
        match icon {
            Some(s) => {
                icons.insert(entry.label.clone(), s);
            }
            None => tracing::warn!(label = entry.label.as_str(), "no legend icon"),
        }
    }
    icons
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(url: &str) -> String {
        let b64 = url.trim_start_matches("data:image/svg+xml;base64,");
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn colors_are_normalized() {
        assert_eq!(
            StyleColor::Rgba(vec![228.0, 26.0, 28.0, 1.0]).to_css().as_deref(),
            Some("rgba(228, 26, 28, 1)")
        );
        assert_eq!(StyleColor::Css("#ff0000".to_string()).to_css().as_deref(), Some("rgba(255, 0, 0, 1)"));
        assert_eq!(StyleColor::Css("rgba(0,128,0,0.5)".to_string()).to_css().as_deref(), Some("rgba(0, 128, 0, 0.5)"));
        assert_eq!(StyleColor::Css("nope".to_string()).to_css(), None);
        assert_eq!(StyleColor::Rgba(vec![1.0]).to_css(), None);
    }

    #[test]
    fn icon_list_by_geometry_type() {
        let legend: Vec<LegendEntry> = serde_json::from_value(json!([
            { "label": "Schule", "geometryType": "Point",
              "style": { "circleFillColor": [0, 92, 169, 1], "circleRadius": 6 } },
            { "label": "Radweg", "geometryType": "LineString",
              "style": { "lineStrokeColor": "#e41a1c", "lineStrokeDash": [4, 2] } },
            { "label": "Park", "geometryType": "Polygon",
              "style": { "polygonFillColor": [10, 200, 100, 0.5] } },
            { "label": "Denkmal", "style": { "type": "icon", "imagePath": "/img/", "imageName": "denkmal.png" } },
            { "label": "Unbekannt", "style": {} }
        ]))
        .unwrap();
        let icons = get_icon_list_from_legend(&legend, &DiagonalHatch);
        assert_eq!(icons.len(), 4);
        assert_eq!(icons["Denkmal"], "/img/denkmal.png");

        let circle = decode(&icons["Schule"]);
        assert!(circle.contains("<circle"));
        assert!(circle.contains("r='6'"));
        assert!(circle.contains("fill='rgba(0, 92, 169, 1)'"));

        let line = decode(&icons["Radweg"]);
        assert!(line.contains("stroke='rgba(228, 26, 28, 1)'"));
        assert!(line.contains("stroke-dasharray='4 2'"));

        let polygon = decode(&icons["Park"]);
        assert!(polygon.contains("fill:rgba(10, 200, 100, 0.5)"));
    }

    #[test]
    fn hatched_polygons_use_the_pattern() {
        struct Dots;
        impl HatchPattern for Dots {
            fn pattern(&self, id: &str, _hatch: &HatchStyle) -> String {
                format!("<pattern id='{id}'><circle r='1'/></pattern>")
            }
        }
        let style = LegendStyle {
            polygon_fill_hatch: Some(HatchStyle::default()),
            ..LegendStyle::default()
        };
        let svg = create_polygon_svg(&style, &Dots);
        assert!(svg.contains("<defs><pattern id='hatch'><circle r='1'/></pattern></defs>"));
        assert!(svg.contains("fill:url(#hatch)"));
        assert!(create_polygon_svg(&style, &DiagonalHatch).contains("patternTransform='rotate(45)'"));
    }
}
