//! SVG document replay
//!
//! Walks a parsed document and issues the equivalent `Canvas2d` calls. Elements with a
//! transform, clip path or `use` offset are bracketed by `save`/`restore`; everything else
//! draws straight into the current state.

use std::collections::HashMap;
use std::f64::consts::PI;

use roxmltree::{Document, Node};

use crate::canvas::{
    Canvas2d, Color, DrawCommand, FillStyle, Paint, Pattern, RecordingCanvas, Shadow,
    StrokeStyle, TextAlign, TextStyle,
};
use crate::error::{Result, SvgError};
use crate::matrix::Matrix;
use crate::path::{PathSegment, parse_path_data, replay_path};
use crate::style::{
    PaintRef, Style, TextDecoration, parse_color, parse_length, parse_number_list,
    parse_transform, parse_url_ref, property,
};

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Nesting limit for groups, `use` chains and pattern tiles.
const MAX_DEPTH: usize = 64;

/// Elements that only draw when referenced.
const NON_RENDERING: &[&str] = &[
    "defs",
    "clipPath",
    "pattern",
    "filter",
    "mask",
    "symbol",
    "linearGradient",
    "radialGradient",
    "title",
    "desc",
    "metadata",
    "style",
    "script",
];

const SHAPES: &[&str] = &["rect", "circle", "ellipse", "line", "polyline", "polygon", "path"];

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Overrides the root `width` attribute.
    pub width: Option<f64>,
    /// Overrides the root `height` attribute.
    pub height: Option<f64>,
    pub margin_x: f64,
    pub margin_y: f64,
    /// Painted under the drawing, margins included.
    pub background: Option<Color>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            margin_x: 0.0,
            margin_y: 0.0,
            background: None,
        }
    }
}

/// Replay `markup` onto `canvas`.
pub fn render_svg(markup: &str, canvas: &mut dyn Canvas2d, options: &RenderOptions) -> Result<()> {
    let doc = Document::parse(markup)?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(SvgError::MissingRoot);
    }

    let width = options
        .width
        .or_else(|| root.attribute("width").and_then(parse_length))
        .unwrap_or(0.0);
    let height = options
        .height
        .or_else(|| root.attribute("height").and_then(parse_length))
        .unwrap_or(0.0);
    if !(width.is_finite() && height.is_finite()) || width < 0.0 || height < 0.0 {
        return Err(SvgError::InvalidSize { width, height });
    }

    canvas.translate(options.margin_x, options.margin_y);
    if let Some(background) = options.background {
        canvas.fill_rect(
            -options.margin_x,
            -options.margin_y,
            width + 2.0 * options.margin_x,
            height + 2.0 * options.margin_y,
            &FillStyle::color(background),
        );
    }
    if let Some(matrix) = viewbox_matrix(root, width, height) {
        canvas.transform(matrix);
    }

    let renderer = Renderer::new(&doc);
    let style = Style::default().cascade(root);
    renderer.render_children(root, &style, canvas, 0);

    tracing::debug!(width, height, "Rendered SVG document");
    Ok(())
}

/// Render into a fresh `RecordingCanvas` and return its commands.
pub fn record_svg(markup: &str, options: &RenderOptions) -> Result<Vec<DrawCommand>> {
    let mut canvas = RecordingCanvas::new();
    render_svg(markup, &mut canvas, options)?;
    Ok(canvas.into_commands())
}

fn viewbox_matrix(root: Node<'_, '_>, width: f64, height: f64) -> Option<Matrix> {
    let values = parse_number_list(root.attribute("viewBox")?);
    let &[x, y, w, h] = values.as_slice() else {
        tracing::debug!(?values, "Ignoring malformed viewBox");
        return None;
    };
    if w <= 0.0 || h <= 0.0 || width <= 0.0 || height <= 0.0 {
        return None;
    }
    let sx = width / w;
    let sy = height / h;
    let matrix = Matrix::new(sx, 0.0, 0.0, sy, -x * sx, -y * sy);
    (!matrix.is_identity()).then_some(matrix)
}

fn number(node: Node<'_, '_>, name: &str) -> f64 {
    node.attribute(name).and_then(parse_length).unwrap_or(0.0)
}

/// First value of a coordinate list attribute such as `tspan`'s `x`.
fn first_number(node: Node<'_, '_>, name: &str) -> Option<f64> {
    node.attribute(name)
        .and_then(|v| parse_number_list(v).first().copied())
}

fn href<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute((XLINK_NS, "href"))
        .or_else(|| node.attribute("href"))
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Geometry {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        radius: f64,
    },
    Circle {
        cx: f64,
        cy: f64,
        r: f64,
    },
    Ellipse {
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
    },
    Path(Vec<PathSegment>),
}

impl Geometry {
    fn from_node(node: Node<'_, '_>) -> Option<Geometry> {
        match node.tag_name().name() {
            "rect" => {
                let width = number(node, "width");
                let height = number(node, "height");
                if width <= 0.0 || height <= 0.0 {
                    return None;
                }
                let rx = node.attribute("rx").and_then(parse_length);
                let ry = node.attribute("ry").and_then(parse_length);
                let radius = rx.or(ry).unwrap_or(0.0).max(0.0);
                Some(Geometry::Rect {
                    x: number(node, "x"),
                    y: number(node, "y"),
                    width,
                    height,
                    radius: radius.min(width / 2.0).min(height / 2.0),
                })
            }
            "circle" => {
                let r = number(node, "r");
                (r > 0.0).then(|| Geometry::Circle {
                    cx: number(node, "cx"),
                    cy: number(node, "cy"),
                    r,
                })
            }
            "ellipse" => {
                let rx = number(node, "rx");
                let ry = number(node, "ry");
                (rx > 0.0 && ry > 0.0).then(|| Geometry::Ellipse {
                    cx: number(node, "cx"),
                    cy: number(node, "cy"),
                    rx,
                    ry,
                })
            }
            "line" => Some(Geometry::Path(vec![
                PathSegment::MoveTo(number(node, "x1"), number(node, "y1")),
                PathSegment::LineTo(number(node, "x2"), number(node, "y2")),
            ])),
            name @ ("polyline" | "polygon") => {
                let values = parse_number_list(node.attribute("points")?);
                let mut points = values.chunks_exact(2).map(|p| (p[0], p[1]));
                let (x, y) = points.next()?;
                let mut segments = vec![PathSegment::MoveTo(x, y)];
                segments.extend(points.map(|(x, y)| PathSegment::LineTo(x, y)));
                if segments.len() < 2 {
                    return None;
                }
                if name == "polygon" {
                    segments.push(PathSegment::Close);
                }
                Some(Geometry::Path(segments))
            }
            "path" => {
                let segments = parse_path_data(node.attribute("d")?);
                (!segments.is_empty()).then_some(Geometry::Path(segments))
            }
            _ => None,
        }
    }

    fn trace(&self, canvas: &mut dyn Canvas2d) {
        match self {
            &Geometry::Rect {
                x,
                y,
                width,
                height,
                radius,
            } => {
                if radius > 0.0 {
                    canvas.save();
                    canvas.translate(x, y);
                    canvas.move_to(radius, 0.0);
                    canvas.arc_to(width, 0.0, width, height, radius);
                    canvas.arc_to(width, height, 0.0, height, radius);
                    canvas.arc_to(0.0, height, 0.0, 0.0, radius);
                    canvas.arc_to(0.0, 0.0, radius, 0.0, radius);
                    canvas.close_path();
                    canvas.restore();
                } else {
                    canvas.rect(x, y, width, height);
                }
            }
            &Geometry::Circle { cx, cy, r } => canvas.arc(cx, cy, r, 0.0, 2.0 * PI, true),
            &Geometry::Ellipse { cx, cy, rx, ry } => {
                canvas.ellipse(cx, cy, rx, ry, 0.0, 0.0, 2.0 * PI, false)
            }
            Geometry::Path(segments) => replay_path(segments, canvas),
        }
    }
}

fn stroke_style(style: &Style) -> Option<StrokeStyle> {
    match &style.stroke {
        Some(PaintRef::Color(color)) if style.stroke_width > 0.0 => Some(StrokeStyle {
            color: *color,
            line_width: style.stroke_width,
            line_join: style.line_join,
            line_cap: style.line_cap,
            dash: style.dash.clone(),
            global_alpha: style.opacity * style.stroke_opacity,
        }),
        Some(PaintRef::Url(id)) => {
            tracing::debug!(id = %id, "Paint server strokes are not supported");
            None
        }
        _ => None,
    }
}

// ============================================================================
// Renderer
// ============================================================================

struct Renderer<'a, 'input> {
    ids: HashMap<&'a str, Node<'a, 'input>>,
}

impl<'a, 'input> Renderer<'a, 'input> {
    fn new(doc: &'a Document<'input>) -> Self {
        let ids = doc
            .descendants()
            .filter_map(|node| node.attribute("id").map(|id| (id, node)))
            .collect();
        Self { ids }
    }

    /// Element with `id`, if it has the expected tag.
    fn find(&self, id: &str, tag: Option<&str>) -> Option<Node<'a, 'input>> {
        match self.ids.get(id) {
            Some(node) if tag.is_none_or(|tag| node.tag_name().name() == tag) => Some(*node),
            _ => {
                tracing::debug!(id, tag, "Unresolved reference");
                None
            }
        }
    }

    /// Element named by a `url(#id)` value.
    fn lookup(&self, value: &str, tag: &str) -> Option<Node<'a, 'input>> {
        let id = parse_url_ref(value)?;
        self.find(&id, Some(tag))
    }

    fn render_children(
        &self,
        node: Node<'a, 'input>,
        style: &Style,
        canvas: &mut dyn Canvas2d,
        depth: usize,
    ) {
        for child in node.children().filter(Node::is_element) {
            self.render_element(child, style, canvas, depth);
        }
    }

    fn render_element(
        &self,
        node: Node<'a, 'input>,
        parent: &Style,
        canvas: &mut dyn Canvas2d,
        depth: usize,
    ) {
        if depth > MAX_DEPTH {
            tracing::debug!(depth, "Element nesting too deep, skipping");
            return;
        }
        let name = node.tag_name().name();
        if NON_RENDERING.contains(&name) {
            return;
        }

        let style = parent.cascade(node);
        let transforms = node
            .attribute("transform")
            .map(parse_transform)
            .unwrap_or_default();
        let offset = if name == "use" {
            (number(node, "x"), number(node, "y"))
        } else {
            (0.0, 0.0)
        };
        let clip = property(node, "clip-path").and_then(|v| self.lookup(&v, "clipPath"));

        let isolated = !transforms.is_empty() || clip.is_some() || offset != (0.0, 0.0);
        if isolated {
            canvas.save();
            for transform in &transforms {
                transform.apply(canvas);
            }
            if offset != (0.0, 0.0) {
                canvas.translate(offset.0, offset.1);
            }
            if let Some(clip) = clip {
                self.apply_clip(clip, canvas);
            }
        }

        match name {
            "svg" | "g" | "a" | "switch" => self.render_children(node, &style, canvas, depth + 1),
            "use" => {
                let target = href(node)
                    .and_then(|reference| reference.rsplit('#').next())
                    .and_then(|id| self.find(id, None));
                if let Some(target) = target {
                    self.render_referenced(target, &style, canvas, depth + 1);
                }
            }
            "text" => {
                let mut cursor = (number(node, "x"), number(node, "y"));
                self.render_text_content(node, &style, canvas, &mut cursor);
            }
            "image" => render_image(node, &style, canvas),
            _ if SHAPES.contains(&name) => {
                if let Some(geometry) = Geometry::from_node(node) {
                    self.draw_shape(node, &geometry, &style, canvas, depth);
                }
            }
            _ => tracing::debug!(element = name, "Skipping unsupported element"),
        }

        if isolated {
            canvas.restore();
        }
    }

    /// A `use` target. Symbols draw their children; other elements draw themselves.
    fn render_referenced(
        &self,
        target: Node<'a, 'input>,
        style: &Style,
        canvas: &mut dyn Canvas2d,
        depth: usize,
    ) {
        if target.tag_name().name() == "symbol" {
            let symbol = style.cascade(target);
            self.render_children(target, &symbol, canvas, depth);
        } else {
            self.render_element(target, style, canvas, depth);
        }
    }

    fn apply_clip(&self, clip: Node<'a, 'input>, canvas: &mut dyn Canvas2d) {
        canvas.begin_path();
        for child in clip.children().filter(Node::is_element) {
            let Some(geometry) = Geometry::from_node(child) else {
                continue;
            };
            let transforms = child
                .attribute("transform")
                .map(parse_transform)
                .unwrap_or_default();
            if transforms.is_empty() {
                geometry.trace(canvas);
            } else {
                canvas.save();
                for transform in &transforms {
                    transform.apply(canvas);
                }
                geometry.trace(canvas);
                canvas.restore();
            }
        }
        canvas.close_path();
        canvas.clip();
    }

    fn draw_shape(
        &self,
        node: Node<'a, 'input>,
        geometry: &Geometry,
        style: &Style,
        canvas: &mut dyn Canvas2d,
        depth: usize,
    ) {
        if !style.visible {
            return;
        }
        let fill = if node.tag_name().name() == "line" {
            None
        } else {
            self.fill_style(node, style, depth)
        };
        let stroke = stroke_style(style);
        if fill.is_none() && stroke.is_none() {
            return;
        }

        canvas.begin_path();
        geometry.trace(canvas);
        if let Some(fill) = &fill {
            canvas.fill(fill);
        }
        if let Some(stroke) = &stroke {
            canvas.stroke(stroke);
        }
    }

    fn fill_style(&self, node: Node<'a, 'input>, style: &Style, depth: usize) -> Option<FillStyle> {
        let paint = match style.fill.as_ref()? {
            PaintRef::None => return None,
            PaintRef::Color(color) => Paint::Color(*color),
            PaintRef::Url(id) => Paint::Pattern(self.pattern(id, depth)?),
        };
        Some(FillStyle {
            paint,
            global_alpha: style.opacity * style.fill_opacity,
            shadow: self.shadow(node),
        })
    }

    fn pattern(&self, id: &str, depth: usize) -> Option<Pattern> {
        let node = self.find(id, Some("pattern"))?;
        let width = number(node, "width");
        let height = number(node, "height");
        if width <= 0.0 || height <= 0.0 {
            tracing::debug!(id, width, height, "Empty pattern tile");
            return None;
        }

        let mut tile = RecordingCanvas::new();
        let style = Style::default().cascade(node);
        self.render_children(node, &style, &mut tile, depth + 1);
        Some(Pattern {
            width,
            height,
            commands: tile.into_commands(),
        })
    }

    /// Drop shadow described by the element's filter.
    fn shadow(&self, node: Node<'a, 'input>) -> Option<Shadow> {
        let filter = self.lookup(&property(node, "filter")?, "filter")?;
        let mut shadow = Shadow {
            blur: 0.0,
            color: Color::BLACK,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        let mut found = false;

        for primitive in filter.descendants().filter(Node::is_element) {
            match primitive.tag_name().name() {
                "feGaussianBlur" => {
                    shadow.blur = first_number(primitive, "stdDeviation").unwrap_or(0.0);
                    found = true;
                }
                "feOffset" => {
                    shadow.offset_x = number(primitive, "dx");
                    shadow.offset_y = number(primitive, "dy");
                    found = true;
                }
                "feFlood" => {
                    let color = property(primitive, "flood-color")
                        .and_then(|v| parse_color(&v))
                        .unwrap_or(Color::BLACK);
                    let opacity = property(primitive, "flood-opacity")
                        .and_then(|v| v.trim().parse::<f64>().ok())
                        .unwrap_or(1.0);
                    shadow.color = color.with_alpha(color.a * opacity.clamp(0.0, 1.0));
                    found = true;
                }
                _ => {}
            }
        }

        found.then_some(shadow)
    }

    // ------------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------------

    fn render_text_content(
        &self,
        node: Node<'a, 'input>,
        style: &Style,
        canvas: &mut dyn Canvas2d,
        cursor: &mut (f64, f64),
    ) {
        for child in node.children() {
            if child.is_text() {
                if let Some(text) = child.text() {
                    draw_text_run(&collapse_whitespace(text), style, canvas, cursor);
                }
            } else if child.is_element() && child.tag_name().name() == "tspan" {
                let span = style.cascade(child);
                if let Some(x) = first_number(child, "x") {
                    cursor.0 = x;
                }
                if let Some(y) = first_number(child, "y") {
                    cursor.1 = y;
                }
                cursor.0 += first_number(child, "dx").unwrap_or(0.0);
                cursor.1 += first_number(child, "dy").unwrap_or(0.0);
                self.render_text_content(child, &span, canvas, cursor);
            }
        }
    }
}

fn draw_text_run(text: &str, style: &Style, canvas: &mut dyn Canvas2d, cursor: &mut (f64, f64)) {
    if text.is_empty() {
        return;
    }
    let width = canvas.measure_text(text, &style.font);
    let (x, y) = *cursor;
    cursor.0 += width;
    if !style.visible {
        return;
    }

    let fill = match &style.fill {
        None => Some(Color::BLACK),
        Some(PaintRef::Color(color)) => Some(*color),
        Some(PaintRef::None) => None,
        Some(PaintRef::Url(id)) => {
            tracing::debug!(id = %id, "Paint server text fills are not supported");
            None
        }
    };
    let fill_alpha = style.opacity * style.fill_opacity;
    let stroke = stroke_style(style);

    if let Some(color) = fill {
        canvas.fill_text(
            text,
            x,
            y,
            &TextStyle {
                font: style.font.clone(),
                align: style.text_anchor,
                color,
                global_alpha: fill_alpha,
            },
        );
    }
    if let Some(stroke) = &stroke {
        canvas.stroke_text(text, x, y, &style.font, style.text_anchor, stroke);
    }

    let size = style.font.size;
    let thickness = (size / 20.0).max(1.0);
    let top = match style.text_decoration {
        TextDecoration::None => return,
        TextDecoration::Underline => y + thickness,
        TextDecoration::Overline => y - 0.95 * size,
        TextDecoration::LineThrough => y - 0.35 * size,
    };
    let left = match style.text_anchor {
        TextAlign::Left => x,
        TextAlign::Center => x - width / 2.0,
        TextAlign::Right => x - width,
    };
    if fill.is_none() && stroke.is_none() {
        return;
    }

    canvas.begin_path();
    canvas.rect(left, top, width, thickness);
    if let Some(color) = fill {
        canvas.fill(&FillStyle {
            paint: Paint::Color(color),
            global_alpha: fill_alpha,
            shadow: None,
        });
    }
    if let Some(stroke) = &stroke {
        canvas.stroke(stroke);
    }
}

fn render_image(node: Node<'_, '_>, style: &Style, canvas: &mut dyn Canvas2d) {
    if !style.visible {
        return;
    }
    let Some(source) = href(node) else {
        tracing::debug!("Image without href");
        return;
    };
    let width = number(node, "width");
    let height = number(node, "height");
    if width <= 0.0 || height <= 0.0 {
        return;
    }
    canvas.draw_image(
        source,
        number(node, "x"),
        number(node, "y"),
        width,
        height,
        style.opacity,
    );
}

#[cfg(test)]
mod tests;
