//! Attribute and style parsing
//!
//! Presentation attributes are the baseline and the `style` attribute overrides them. Every
//! property handled here is inherited; `clip-path` and `filter` are looked up per element by
//! the renderer through [`property`].

use std::f64::consts::PI;
use std::sync::OnceLock;

use regex::Regex;

use crate::canvas::{Canvas2d, Color, Font, LineCap, LineJoin, TextAlign};
use crate::matrix::Matrix;

// ============================================================================
// Scalars
// ============================================================================

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").expect("valid number pattern")
    })
}

fn transform_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(matrix|translate|scale|rotate|skewX|skewY)\s*\(([^)]*)\)")
            .expect("valid transform pattern")
    })
}

fn rgb_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^rgba?\(\s*([^,\s]+)\s*,\s*([^,\s]+)\s*,\s*([^,\s)]+)\s*(?:,\s*([^,\s)]+)\s*)?\)$")
            .expect("valid rgb pattern")
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^url\(\s*['"]?[^#'"]*#([^'")\s]+)['"]?\s*\)$"#).expect("valid url pattern")
    })
}

/// All numbers in `input`, in order. Separators are anything that is not a number.
pub fn parse_number_list(input: &str) -> Vec<f64> {
    number_regex()
        .find_iter(input)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// A plain number or a `px` length.
pub fn parse_length(input: &str) -> Option<f64> {
    let value = input.trim();
    let value = value.strip_suffix("px").unwrap_or(value).trim();
    value.parse().ok()
}

/// Id referenced by `url(#id)`; anything before the `#` is ignored.
pub fn parse_url_ref(input: &str) -> Option<String> {
    url_regex()
        .captures(input.trim())
        .map(|caps| caps[1].to_string())
}

// ============================================================================
// Colors
// ============================================================================

const NAMED_COLORS: &[(&str, (u8, u8, u8))] = &[
    ("black", (0, 0, 0)),
    ("white", (255, 255, 255)),
    ("red", (255, 0, 0)),
    ("lime", (0, 255, 0)),
    ("green", (0, 128, 0)),
    ("blue", (0, 0, 255)),
    ("yellow", (255, 255, 0)),
    ("cyan", (0, 255, 255)),
    ("aqua", (0, 255, 255)),
    ("magenta", (255, 0, 255)),
    ("fuchsia", (255, 0, 255)),
    ("gray", (128, 128, 128)),
    ("grey", (128, 128, 128)),
    ("silver", (192, 192, 192)),
    ("maroon", (128, 0, 0)),
    ("olive", (128, 128, 0)),
    ("navy", (0, 0, 128)),
    ("purple", (128, 0, 128)),
    ("teal", (0, 128, 128)),
    ("orange", (255, 165, 0)),
];

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

fn channel(input: &str) -> Option<u8> {
    let value = match input.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok()? * 255.0 / 100.0,
        None => input.trim().parse::<f64>().ok()?,
    };
    Some(value.round().clamp(0.0, 255.0) as u8)
}

pub fn parse_color(input: &str) -> Option<Color> {
    let value = input.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let bytes = hex.as_bytes();
        return match bytes.len() {
            3 => {
                let r = hex_digit(bytes[0])?;
                let g = hex_digit(bytes[1])?;
                let b = hex_digit(bytes[2])?;
                Some(Color::rgb(r * 17, g * 17, b * 17))
            }
            6 => {
                let pair = |i: usize| Some(hex_digit(bytes[i])? * 16 + hex_digit(bytes[i + 1])?);
                Some(Color::rgb(pair(0)?, pair(2)?, pair(4)?))
            }
            _ => None,
        };
    }

    let lower = value.to_ascii_lowercase();
    if let Some(caps) = rgb_regex().captures(&lower) {
        let r = channel(&caps[1])?;
        let g = channel(&caps[2])?;
        let b = channel(&caps[3])?;
        let a = match caps.get(4) {
            Some(a) => a.as_str().parse::<f64>().ok()?.clamp(0.0, 1.0),
            None => 1.0,
        };
        return Some(Color::rgba(r, g, b, a));
    }

    if lower == "transparent" {
        return Some(Color::rgba(0, 0, 0, 0.0));
    }
    NAMED_COLORS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, (r, g, b))| Color::rgb(*r, *g, *b))
}

/// Value of a `fill` or `stroke` property.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintRef {
    None,
    Color(Color),
    /// Reference to a paint server such as a `<pattern>`.
    Url(String),
}

/// `None` for values that are not understood, which keeps the inherited paint.
pub fn parse_paint(input: &str) -> Option<PaintRef> {
    let value = input.trim();
    if value.eq_ignore_ascii_case("none") {
        return Some(PaintRef::None);
    }
    if let Some(id) = parse_url_ref(value) {
        return Some(PaintRef::Url(id));
    }
    parse_color(value).map(PaintRef::Color)
}

// ============================================================================
// Transforms
// ============================================================================

/// One entry of a `transform` list. Angles are in degrees.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Matrix(Matrix),
    Translate(f64, f64),
    Scale(f64, f64),
    Rotate { angle: f64, center: Option<(f64, f64)> },
    SkewX(f64),
    SkewY(f64),
}

fn to_radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

impl Transform {
    /// Replay onto a canvas as the equivalent canvas calls.
    pub fn apply(&self, canvas: &mut dyn Canvas2d) {
        match *self {
            Transform::Matrix(m) => canvas.transform(m),
            Transform::Translate(x, y) => canvas.translate(x, y),
            Transform::Scale(x, y) => canvas.scale(x, y),
            Transform::Rotate { angle, center: Some((cx, cy)) } => {
                canvas.translate(cx, cy);
                canvas.rotate(to_radians(angle));
                canvas.translate(-cx, -cy);
            }
            Transform::Rotate { angle, center: None } => canvas.rotate(to_radians(angle)),
            Transform::SkewX(angle) => canvas.transform(Matrix::skew_x(to_radians(angle))),
            Transform::SkewY(angle) => canvas.transform(Matrix::skew_y(to_radians(angle))),
        }
    }

    pub fn to_matrix(&self) -> Matrix {
        match *self {
            Transform::Matrix(m) => m,
            Transform::Translate(x, y) => Matrix::translate(x, y),
            Transform::Scale(x, y) => Matrix::scale(x, y),
            Transform::Rotate { angle, center: Some((cx, cy)) } => Matrix::translate(cx, cy)
                .multiply(&Matrix::rotate(to_radians(angle)))
                .multiply(&Matrix::translate(-cx, -cy)),
            Transform::Rotate { angle, center: None } => Matrix::rotate(to_radians(angle)),
            Transform::SkewX(angle) => Matrix::skew_x(to_radians(angle)),
            Transform::SkewY(angle) => Matrix::skew_y(to_radians(angle)),
        }
    }
}

/// Parse a transform list. Entries with the wrong number of arguments are skipped.
pub fn parse_transform(input: &str) -> Vec<Transform> {
    let mut out = Vec::new();
    for caps in transform_regex().captures_iter(input) {
        let args = parse_number_list(&caps[2]);
        let transform = match (&caps[1], args.as_slice()) {
            ("matrix", &[a, b, c, d, e, f]) => Transform::Matrix(Matrix::new(a, b, c, d, e, f)),
            ("translate", &[x]) => Transform::Translate(x, 0.0),
            ("translate", &[x, y]) => Transform::Translate(x, y),
            ("scale", &[s]) => Transform::Scale(s, s),
            ("scale", &[x, y]) => Transform::Scale(x, y),
            ("rotate", &[angle]) => Transform::Rotate { angle, center: None },
            ("rotate", &[angle, cx, cy]) => Transform::Rotate {
                angle,
                center: Some((cx, cy)),
            },
            ("skewX", &[angle]) => Transform::SkewX(angle),
            ("skewY", &[angle]) => Transform::SkewY(angle),
            (name, _) => {
                tracing::debug!(name, args = ?args, "Ignoring malformed transform");
                continue;
            }
        };
        out.push(transform);
    }
    out
}

// ============================================================================
// Declarations
// ============================================================================

/// `name: value` pairs of a `style` attribute, names lowercased.
pub fn parse_style_attribute(input: &str) -> Vec<(String, String)> {
    input
        .split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            Some((name, value.trim().to_string()))
        })
        .collect()
}

/// Declared value of `name` on this element; `style` wins over the attribute.
pub fn property(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    let from_style = node.attribute("style").and_then(|style| {
        parse_style_attribute(style)
            .into_iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    });
    from_style.or_else(|| node.attribute(name).map(str::to_string))
}

/// `'Segoe UI', Verdana` becomes `"Segoe UI",Verdana`.
pub fn normalize_font_family(input: &str) -> String {
    input
        .split(',')
        .map(str::trim)
        .filter(|family| !family.is_empty())
        .map(|family| {
            let quoted = (family.starts_with('\'') && family.ends_with('\''))
                || (family.starts_with('"') && family.ends_with('"'));
            if quoted && family.len() >= 2 {
                format!("\"{}\"", &family[1..family.len() - 1])
            } else {
                family.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    Overline,
    LineThrough,
}

/// Computed style of an element after inheritance.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    /// `None` until some ancestor declares a fill.
    pub fill: Option<PaintRef>,
    pub fill_opacity: f64,
    pub stroke: Option<PaintRef>,
    pub stroke_opacity: f64,
    pub stroke_width: f64,
    pub dash: Vec<f64>,
    pub line_join: LineJoin,
    pub line_cap: LineCap,
    pub opacity: f64,
    pub visible: bool,
    pub font: Font,
    pub text_anchor: TextAlign,
    pub text_decoration: TextDecoration,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: None,
            fill_opacity: 1.0,
            stroke: None,
            stroke_opacity: 1.0,
            stroke_width: 1.0,
            dash: Vec::new(),
            line_join: LineJoin::Miter,
            line_cap: LineCap::Butt,
            opacity: 1.0,
            visible: true,
            font: Font::default(),
            text_anchor: TextAlign::Left,
            text_decoration: TextDecoration::None,
        }
    }
}

impl Style {
    /// Style of `node` given its parent's computed style.
    pub fn cascade(&self, node: roxmltree::Node<'_, '_>) -> Style {
        let mut style = self.clone();
        for attr in node.attributes() {
            style.apply(attr.name(), attr.value());
        }
        if let Some(decls) = node.attribute("style") {
            for (name, value) in parse_style_attribute(decls) {
                style.apply(&name, &value);
            }
        }
        style
    }

    fn apply(&mut self, name: &str, value: &str) {
        let value = value.trim();
        match name {
            "fill" => {
                if let Some(paint) = parse_paint(value) {
                    self.fill = Some(paint);
                }
            }
            "stroke" => {
                if let Some(paint) = parse_paint(value) {
                    self.stroke = Some(paint);
                }
            }
            "fill-opacity" => set_unit(&mut self.fill_opacity, value),
            "stroke-opacity" => set_unit(&mut self.stroke_opacity, value),
            "opacity" => set_unit(&mut self.opacity, value),
            "stroke-width" => {
                if let Some(width) = parse_length(value) {
                    self.stroke_width = width.max(0.0);
                }
            }
            "stroke-dasharray" => {
                self.dash = if value.eq_ignore_ascii_case("none") {
                    Vec::new()
                } else {
                    parse_number_list(value)
                };
            }
            "stroke-linejoin" => {
                self.line_join = match value {
                    "round" => LineJoin::Round,
                    "bevel" => LineJoin::Bevel,
                    _ => LineJoin::Miter,
                };
            }
            "stroke-linecap" => {
                self.line_cap = match value {
                    "round" => LineCap::Round,
                    "square" => LineCap::Square,
                    _ => LineCap::Butt,
                };
            }
            "visibility" => self.visible = !matches!(value, "hidden" | "collapse"),
            "font-family" => self.font.family = normalize_font_family(value),
            "font-size" => {
                if let Some(size) = parse_length(value) {
                    self.font.size = size;
                }
            }
            "font-weight" => self.font.weight = value.to_string(),
            "font-style" => self.font.style = value.to_string(),
            "text-anchor" => {
                self.text_anchor = match value {
                    "middle" => TextAlign::Center,
                    "end" => TextAlign::Right,
                    _ => TextAlign::Left,
                };
            }
            "text-decoration" => {
                self.text_decoration = match value {
                    "underline" => TextDecoration::Underline,
                    "overline" => TextDecoration::Overline,
                    "line-through" => TextDecoration::LineThrough,
                    _ => TextDecoration::None,
                };
            }
            _ => {}
        }
    }
}

fn set_unit(target: &mut f64, value: &str) {
    if let Ok(v) = value.parse::<f64>() {
        *target = v.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn colors() {
        assert_eq!(parse_color("#F2f2f2"), Some(Color::rgb(242, 242, 242)));
        assert_eq!(parse_color("#222"), Some(Color::rgb(34, 34, 34)));
        assert_eq!(parse_color("lime"), Some(Color::rgb(0, 255, 0)));
        assert_eq!(
            parse_color("rgba(10, 20, 30, 0.5)"),
            Some(Color::rgba(10, 20, 30, 0.5))
        );
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("currentColor"), None);
    }

    #[test]
    fn url_refs_ignore_the_document_part() {
        assert_eq!(
            parse_url_ref("url(someurl#clippath1-part-1)"),
            Some("clippath1-part-1".to_string())
        );
        assert_eq!(parse_url_ref("url('#p')"), Some("p".to_string()));
        assert_eq!(parse_url_ref("url(nohash)"), None);
        assert_eq!(parse_paint("none"), Some(PaintRef::None));
    }

    #[test]
    fn transform_lists_keep_their_order() {
        let list = parse_transform("translate(-100.5,10.5) rotate(-270,-100.5,10.5) scale(2)");
        assert_eq!(
            list,
            vec![
                Transform::Translate(-100.5, 10.5),
                Transform::Rotate {
                    angle: -270.0,
                    center: Some((-100.5, 10.5)),
                },
                Transform::Scale(2.0, 2.0),
            ]
        );
        assert_eq!(parse_transform("translate(5)"), vec![Transform::Translate(5.0, 0.0)]);
        assert!(parse_transform("rotate(1,2)").is_empty());
    }

    #[test]
    fn font_families_are_requoted() {
        assert_eq!(
            normalize_font_family("'Segoe UI Light', 'Helvetica Neue', Verdana"),
            "\"Segoe UI Light\",\"Helvetica Neue\",Verdana"
        );
    }

    #[test]
    fn style_attribute_beats_presentation_attributes() {
        let doc = roxmltree::Document::parse(
            r##"<g fill="#ff0000" stroke-width="4" style="fill:#00ff00; font-size:16px"/>"##,
        )
        .unwrap();
        let style = Style::default().cascade(doc.root_element());
        assert_eq!(style.fill, Some(PaintRef::Color(Color::rgb(0, 255, 0))));
        assert_eq!(style.stroke_width, 4.0);
        assert_eq!(style.font.size, 16.0);
        assert_eq!(
            property(doc.root_element(), "fill").as_deref(),
            Some("#00ff00")
        );
    }

    #[test]
    fn opacity_is_inherited_not_multiplied() {
        let doc = roxmltree::Document::parse(r#"<g opacity="0.5"><path opacity="1"/><path/></g>"#)
            .unwrap();
        let group = Style::default().cascade(doc.root_element());
        let mut children = doc.root_element().children().filter(|n| n.is_element());
        let first = group.cascade(children.next().unwrap());
        let second = group.cascade(children.next().unwrap());
        assert_eq!(first.opacity, 1.0);
        assert_eq!(second.opacity, 0.5);
    }
}
