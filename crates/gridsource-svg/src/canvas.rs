//! Drawing surface abstraction
//!
//! `Canvas2d` mirrors the immediate-mode 2D canvas API the renderer replays onto. Paint state
//! travels with each fill or stroke instead of living in setters, so a recorded command is
//! self-describing.
//!
//! `RecordingCanvas` keeps every call as a `DrawCommand` and tracks the current transform,
//! which is what tests and pattern tiles use.

use std::fmt;

use crate::matrix::Matrix;

// ============================================================================
// Paint
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// 0.0 to 1.0
    pub a: f64,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, a: f64) -> Self {
        Self { a, ..self }
    }
}

/// Opaque colors print as `#rrggbb`, translucent ones as `rgba(r, g, b, a)`.
impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a >= 1.0 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
        }
    }
}

/// A tile recorded once and repeated over the filled area.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub width: f64,
    pub height: f64,
    pub commands: Vec<DrawCommand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Color(Color),
    Pattern(Pattern),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shadow {
    pub blur: f64,
    pub color: Color,
    pub offset_x: f64,
    pub offset_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillStyle {
    pub paint: Paint,
    pub global_alpha: f64,
    pub shadow: Option<Shadow>,
}

impl FillStyle {
    pub fn color(color: Color) -> Self {
        Self {
            paint: Paint::Color(color),
            global_alpha: 1.0,
            shadow: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeStyle {
    pub color: Color,
    pub line_width: f64,
    pub line_join: LineJoin,
    pub line_cap: LineCap,
    pub dash: Vec<f64>,
    pub global_alpha: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Font {
    /// Comma separated family list with quoted names, e.g. `"Segoe UI",Verdana`.
    pub family: String,
    pub size: f64,
    pub weight: String,
    pub style: String,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            family: "sans-serif".into(),
            size: 10.0,
            weight: "normal".into(),
            style: "normal".into(),
        }
    }
}

/// CSS font shorthand.
impl fmt::Display for Font {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}px {}", self.style, self.weight, self.size, self.family)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font: Font,
    pub align: TextAlign,
    pub color: Color,
    pub global_alpha: f64,
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Save,
    Restore,
    Translate { x: f64, y: f64 },
    Rotate { angle: f64 },
    Scale { x: f64, y: f64 },
    Transform(Matrix),
    BeginPath,
    ClosePath,
    MoveTo { x: f64, y: f64 },
    LineTo { x: f64, y: f64 },
    BezierCurveTo { x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64 },
    QuadraticCurveTo { x1: f64, y1: f64, x: f64, y: f64 },
    Arc {
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    },
    Ellipse {
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    },
    ArcTo { x1: f64, y1: f64, x2: f64, y2: f64, radius: f64 },
    Rect { x: f64, y: f64, width: f64, height: f64 },
    Clip,
    Fill(FillStyle),
    Stroke(StrokeStyle),
    FillRect { x: f64, y: f64, width: f64, height: f64, style: FillStyle },
    FillText { text: String, x: f64, y: f64, style: TextStyle },
    StrokeText { text: String, x: f64, y: f64, font: Font, align: TextAlign, style: StrokeStyle },
    DrawImage { href: String, x: f64, y: f64, width: f64, height: f64, global_alpha: f64 },
}

// ============================================================================
// Canvas trait
// ============================================================================

pub trait Canvas2d {
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, x: f64, y: f64);
    fn rotate(&mut self, angle: f64);
    fn scale(&mut self, x: f64, y: f64);
    fn transform(&mut self, matrix: Matrix);

    fn begin_path(&mut self);
    fn close_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    fn bezier_curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64);
    fn quadratic_curve_to(&mut self, x1: f64, y1: f64, x: f64, y: f64);
    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64, anticlockwise: bool);
    #[allow(clippy::too_many_arguments)]
    fn ellipse(
        &mut self,
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start: f64,
        end: f64,
        anticlockwise: bool,
    );
    fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64);
    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64);
    fn clip(&mut self);

    fn fill(&mut self, style: &FillStyle);
    fn stroke(&mut self, style: &StrokeStyle);
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &FillStyle);
    fn fill_text(&mut self, text: &str, x: f64, y: f64, style: &TextStyle);
    fn stroke_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        font: &Font,
        align: TextAlign,
        style: &StrokeStyle,
    );
    fn draw_image(
        &mut self,
        href: &str,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        global_alpha: f64,
    );

    /// Advance width of `text` in `font`.
    fn measure_text(&self, text: &str, font: &Font) -> f64;
}

/// Replay recorded commands onto another canvas.
pub fn replay(commands: &[DrawCommand], canvas: &mut dyn Canvas2d) {
    for command in commands {
        match command {
            DrawCommand::Save => canvas.save(),
            DrawCommand::Restore => canvas.restore(),
            DrawCommand::Translate { x, y } => canvas.translate(*x, *y),
            DrawCommand::Rotate { angle } => canvas.rotate(*angle),
            DrawCommand::Scale { x, y } => canvas.scale(*x, *y),
            DrawCommand::Transform(m) => canvas.transform(*m),
            DrawCommand::BeginPath => canvas.begin_path(),
            DrawCommand::ClosePath => canvas.close_path(),
            DrawCommand::MoveTo { x, y } => canvas.move_to(*x, *y),
            DrawCommand::LineTo { x, y } => canvas.line_to(*x, *y),
            DrawCommand::BezierCurveTo { x1, y1, x2, y2, x, y } => {
                canvas.bezier_curve_to(*x1, *y1, *x2, *y2, *x, *y)
            }
            DrawCommand::QuadraticCurveTo { x1, y1, x, y } => {
                canvas.quadratic_curve_to(*x1, *y1, *x, *y)
            }
            DrawCommand::Arc {
                x,
                y,
                radius,
                start_angle,
                end_angle,
                anticlockwise,
            } => canvas.arc(*x, *y, *radius, *start_angle, *end_angle, *anticlockwise),
            DrawCommand::Ellipse {
                x,
                y,
                radius_x,
                radius_y,
                rotation,
                start_angle,
                end_angle,
                anticlockwise,
            } => canvas.ellipse(
                *x,
                *y,
                *radius_x,
                *radius_y,
                *rotation,
                *start_angle,
                *end_angle,
                *anticlockwise,
            ),
            DrawCommand::ArcTo { x1, y1, x2, y2, radius } => {
                canvas.arc_to(*x1, *y1, *x2, *y2, *radius)
            }
            DrawCommand::Rect { x, y, width, height } => canvas.rect(*x, *y, *width, *height),
            DrawCommand::Clip => canvas.clip(),
            DrawCommand::Fill(style) => canvas.fill(style),
            DrawCommand::Stroke(style) => canvas.stroke(style),
            DrawCommand::FillRect {
                x,
                y,
                width,
                height,
                style,
            } => canvas.fill_rect(*x, *y, *width, *height, style),
            DrawCommand::FillText { text, x, y, style } => canvas.fill_text(text, *x, *y, style),
            DrawCommand::StrokeText {
                text,
                x,
                y,
                font,
                align,
                style,
            } => canvas.stroke_text(text, *x, *y, font, *align, style),
            DrawCommand::DrawImage {
                href,
                x,
                y,
                width,
                height,
                global_alpha,
            } => canvas.draw_image(href, *x, *y, *width, *height, *global_alpha),
        }
    }
}

// ============================================================================
// Recording canvas
// ============================================================================

/// Canvas that records calls instead of rasterizing them.
#[derive(Debug, Clone)]
pub struct RecordingCanvas {
    commands: Vec<DrawCommand>,
    transform: Matrix,
    stack: Vec<Matrix>,
    /// Glyph advance as a fraction of the font size.
    char_width: f64,
}

impl Default for RecordingCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            transform: Matrix::IDENTITY,
            stack: Vec::new(),
            char_width: 0.5,
        }
    }

    pub fn with_char_width(mut self, ratio: f64) -> Self {
        self.char_width = ratio;
        self
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<DrawCommand> {
        self.commands
    }

    pub fn current_transform(&self) -> Matrix {
        self.transform
    }

    /// Unbalanced saves so far.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    fn concat(&mut self, matrix: Matrix) {
        self.transform = self.transform.multiply(&matrix);
    }
}

impl Canvas2d for RecordingCanvas {
    fn save(&mut self) {
        self.stack.push(self.transform);
        self.push(DrawCommand::Save);
    }

    fn restore(&mut self) {
        if let Some(transform) = self.stack.pop() {
            self.transform = transform;
        }
        self.push(DrawCommand::Restore);
    }

    fn translate(&mut self, x: f64, y: f64) {
        self.concat(Matrix::translate(x, y));
        self.push(DrawCommand::Translate { x, y });
    }

    fn rotate(&mut self, angle: f64) {
        self.concat(Matrix::rotate(angle));
        self.push(DrawCommand::Rotate { angle });
    }

    fn scale(&mut self, x: f64, y: f64) {
        self.concat(Matrix::scale(x, y));
        self.push(DrawCommand::Scale { x, y });
    }

    fn transform(&mut self, matrix: Matrix) {
        self.concat(matrix);
        self.push(DrawCommand::Transform(matrix));
    }

    fn begin_path(&mut self) {
        self.push(DrawCommand::BeginPath);
    }

    fn close_path(&mut self) {
        self.push(DrawCommand::ClosePath);
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.push(DrawCommand::MoveTo { x, y });
    }

    fn line_to(&mut self, x: f64, y: f64) {
        self.push(DrawCommand::LineTo { x, y });
    }

    fn bezier_curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64) {
        self.push(DrawCommand::BezierCurveTo { x1, y1, x2, y2, x, y });
    }

    fn quadratic_curve_to(&mut self, x1: f64, y1: f64, x: f64, y: f64) {
        self.push(DrawCommand::QuadraticCurveTo { x1, y1, x, y });
    }

    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64, anticlockwise: bool) {
        self.push(DrawCommand::Arc {
            x,
            y,
            radius,
            start_angle: start,
            end_angle: end,
            anticlockwise,
        });
    }

    fn ellipse(
        &mut self,
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start: f64,
        end: f64,
        anticlockwise: bool,
    ) {
        self.push(DrawCommand::Ellipse {
            x,
            y,
            radius_x,
            radius_y,
            rotation,
            start_angle: start,
            end_angle: end,
            anticlockwise,
        });
    }

    fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64) {
        self.push(DrawCommand::ArcTo { x1, y1, x2, y2, radius });
    }

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.push(DrawCommand::Rect { x, y, width, height });
    }

    fn clip(&mut self) {
        self.push(DrawCommand::Clip);
    }

    fn fill(&mut self, style: &FillStyle) {
        self.push(DrawCommand::Fill(style.clone()));
    }

    fn stroke(&mut self, style: &StrokeStyle) {
        self.push(DrawCommand::Stroke(style.clone()));
    }

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, style: &FillStyle) {
        self.push(DrawCommand::FillRect {
            x,
            y,
            width,
            height,
            style: style.clone(),
        });
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, style: &TextStyle) {
        self.push(DrawCommand::FillText {
            text: text.to_string(),
            x,
            y,
            style: style.clone(),
        });
    }

    fn stroke_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        font: &Font,
        align: TextAlign,
        style: &StrokeStyle,
    ) {
        self.push(DrawCommand::StrokeText {
            text: text.to_string(),
            x,
            y,
            font: font.clone(),
            align,
            style: style.clone(),
        });
    }

    fn draw_image(
        &mut self,
        href: &str,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        global_alpha: f64,
    ) {
        self.push(DrawCommand::DrawImage {
            href: href.to_string(),
            x,
            y,
            width,
            height,
            global_alpha,
        });
    }

    fn measure_text(&self, text: &str, font: &Font) -> f64 {
        text.chars().count() as f64 * font.size * self.char_width
    }
}
