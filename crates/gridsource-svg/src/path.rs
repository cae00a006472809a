//! SVG path data
//!
//! `parse_path_data` resolves every command to absolute coordinates, expanding shorthand
//! curves and converting elliptical arcs from endpoint to center form, so replay is a
//! direct mapping onto canvas path calls.

use std::f64::consts::PI;

use crate::canvas::Canvas2d;

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CubicTo(f64, f64, f64, f64, f64, f64),
    QuadTo(f64, f64, f64, f64),
    /// Center parameterized arc; `rx == ry` replays as `arc`, otherwise as `ellipse`.
    Arc {
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
        rotation: f64,
        start: f64,
        end: f64,
        anticlockwise: bool,
    },
    Close,
}

pub fn replay_path(segments: &[PathSegment], canvas: &mut dyn Canvas2d) {
    for segment in segments {
        match *segment {
            PathSegment::MoveTo(x, y) => canvas.move_to(x, y),
            PathSegment::LineTo(x, y) => canvas.line_to(x, y),
            PathSegment::CubicTo(x1, y1, x2, y2, x, y) => {
                canvas.bezier_curve_to(x1, y1, x2, y2, x, y)
            }
            PathSegment::QuadTo(x1, y1, x, y) => canvas.quadratic_curve_to(x1, y1, x, y),
            PathSegment::Arc {
                cx,
                cy,
                rx,
                ry,
                rotation,
                start,
                end,
                anticlockwise,
            } => {
                if rx == ry && rotation == 0.0 {
                    canvas.arc(cx, cy, rx, start, end, anticlockwise);
                } else {
                    canvas.ellipse(cx, cy, rx, ry, rotation, start, end, anticlockwise);
                }
            }
            PathSegment::Close => canvas.close_path(),
        }
    }
}

// ============================================================================
// Lexer
// ============================================================================

struct PathLexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> PathLexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn skip_separators(&mut self) {
        while let Some(&c) = self.input.get(self.pos) {
            if c.is_ascii_whitespace() || c == b',' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn next_command(&mut self) -> Option<u8> {
        self.skip_separators();
        let c = *self.input.get(self.pos)?;
        if c.is_ascii_alphabetic() && c != b'e' && c != b'E' {
            self.pos += 1;
            Some(c)
        } else {
            None
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_separators();
        self.pos >= self.input.len()
    }

    fn next_number(&mut self) -> Option<f64> {
        self.skip_separators();
        let start = self.pos;
        let mut end = start;
        let peek = |i: usize| self.input.get(i).copied();

        if matches!(peek(end), Some(b'+' | b'-')) {
            end += 1;
        }
        let mut digits = false;
        while matches!(peek(end), Some(c) if c.is_ascii_digit()) {
            end += 1;
            digits = true;
        }
        if peek(end) == Some(b'.') {
            end += 1;
            while matches!(peek(end), Some(c) if c.is_ascii_digit()) {
                end += 1;
                digits = true;
            }
        }
        if !digits {
            return None;
        }
        if matches!(peek(end), Some(b'e' | b'E')) {
            let mut exp = end + 1;
            if matches!(peek(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            if matches!(peek(exp), Some(c) if c.is_ascii_digit()) {
                while matches!(peek(exp), Some(c) if c.is_ascii_digit()) {
                    exp += 1;
                }
                end = exp;
            }
        }

        let text = std::str::from_utf8(&self.input[start..end]).ok()?;
        let value = text.parse().ok()?;
        self.pos = end;
        Some(value)
    }

    /// Arc flags may be written without separators, e.g. `a5 5 0 01 10 10`.
    fn next_flag(&mut self) -> Option<bool> {
        self.skip_separators();
        let flag = match self.input.get(self.pos)? {
            b'0' => false,
            b'1' => true,
            _ => return None,
        };
        self.pos += 1;
        Some(flag)
    }

    fn next_pair(&mut self) -> Option<(f64, f64)> {
        let save = self.pos;
        match (self.next_number(), self.next_number()) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => {
                self.pos = save;
                None
            }
        }
    }

    fn next_numbers<const N: usize>(&mut self) -> Option<[f64; N]> {
        let save = self.pos;
        let mut out = [0.0; N];
        for slot in out.iter_mut() {
            match self.next_number() {
                Some(v) => *slot = v,
                None => {
                    self.pos = save;
                    return None;
                }
            }
        }
        Some(out)
    }

    fn next_arc(&mut self) -> Option<(f64, f64, f64, bool, bool, f64, f64)> {
        let save = self.pos;
        let arc = (|| {
            let [rx, ry, rotation] = self.next_numbers::<3>()?;
            let large = self.next_flag()?;
            let sweep = self.next_flag()?;
            let (x, y) = self.next_pair()?;
            Some((rx, ry, rotation, large, sweep, x, y))
        })();
        if arc.is_none() {
            self.pos = save;
        }
        arc
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parse a `d` attribute. Parsing stops at the first malformed command and keeps what
/// came before it.
pub fn parse_path_data(d: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut lexer = PathLexer::new(d);
    let (mut cur_x, mut cur_y) = (0.0, 0.0);
    let (mut start_x, mut start_y) = (0.0, 0.0);
    let mut last_cubic: Option<(f64, f64)> = None;
    let mut last_quad: Option<(f64, f64)> = None;

    while !lexer.at_end() {
        let Some(command) = lexer.next_command() else {
            tracing::debug!(offset = lexer.pos, "Stopping at malformed path data");
            break;
        };
        let rel = command.is_ascii_lowercase();
        let offset = |x: f64, y: f64, cx: f64, cy: f64| if rel { (cx + x, cy + y) } else { (x, y) };
        let mut count = 0usize;

        match command.to_ascii_uppercase() {
            b'M' => {
                while let Some((x, y)) = lexer.next_pair() {
                    let (x, y) = offset(x, y, cur_x, cur_y);
                    if count == 0 {
                        segments.push(PathSegment::MoveTo(x, y));
                        (start_x, start_y) = (x, y);
                    } else {
                        // Extra pairs after a moveto are linetos.
                        segments.push(PathSegment::LineTo(x, y));
                    }
                    (cur_x, cur_y) = (x, y);
                    count += 1;
                }
                last_cubic = None;
                last_quad = None;
            }
            b'L' => {
                while let Some((x, y)) = lexer.next_pair() {
                    (cur_x, cur_y) = offset(x, y, cur_x, cur_y);
                    segments.push(PathSegment::LineTo(cur_x, cur_y));
                    count += 1;
                }
                last_cubic = None;
                last_quad = None;
            }
            b'H' => {
                while let Some(x) = lexer.next_number() {
                    cur_x = if rel { cur_x + x } else { x };
                    segments.push(PathSegment::LineTo(cur_x, cur_y));
                    count += 1;
                }
                last_cubic = None;
                last_quad = None;
            }
            b'V' => {
                while let Some(y) = lexer.next_number() {
                    cur_y = if rel { cur_y + y } else { y };
                    segments.push(PathSegment::LineTo(cur_x, cur_y));
                    count += 1;
                }
                last_cubic = None;
                last_quad = None;
            }
            b'C' => {
                while let Some([x1, y1, x2, y2, x, y]) = lexer.next_numbers::<6>() {
                    let (x1, y1) = offset(x1, y1, cur_x, cur_y);
                    let (x2, y2) = offset(x2, y2, cur_x, cur_y);
                    let (x, y) = offset(x, y, cur_x, cur_y);
                    segments.push(PathSegment::CubicTo(x1, y1, x2, y2, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_cubic = Some((x2, y2));
                    count += 1;
                }
                last_quad = None;
            }
            b'S' => {
                while let Some([x2, y2, x, y]) = lexer.next_numbers::<4>() {
                    let (x1, y1) = match last_cubic {
                        Some((px, py)) => (2.0 * cur_x - px, 2.0 * cur_y - py),
                        None => (cur_x, cur_y),
                    };
                    let (x2, y2) = offset(x2, y2, cur_x, cur_y);
                    let (x, y) = offset(x, y, cur_x, cur_y);
                    segments.push(PathSegment::CubicTo(x1, y1, x2, y2, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_cubic = Some((x2, y2));
                    count += 1;
                }
                last_quad = None;
            }
            b'Q' => {
                while let Some([x1, y1, x, y]) = lexer.next_numbers::<4>() {
                    let (x1, y1) = offset(x1, y1, cur_x, cur_y);
                    let (x, y) = offset(x, y, cur_x, cur_y);
                    segments.push(PathSegment::QuadTo(x1, y1, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_quad = Some((x1, y1));
                    count += 1;
                }
                last_cubic = None;
            }
            b'T' => {
                while let Some((x, y)) = lexer.next_pair() {
                    let (x1, y1) = match last_quad {
                        Some((px, py)) => (2.0 * cur_x - px, 2.0 * cur_y - py),
                        None => (cur_x, cur_y),
                    };
                    let (x, y) = offset(x, y, cur_x, cur_y);
                    segments.push(PathSegment::QuadTo(x1, y1, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_quad = Some((x1, y1));
                    count += 1;
                }
                last_cubic = None;
            }
            b'A' => {
                while let Some((rx, ry, rotation, large, sweep, x, y)) = lexer.next_arc() {
                    let (x, y) = offset(x, y, cur_x, cur_y);
                    segments.push(arc_segment(cur_x, cur_y, rx, ry, rotation, large, sweep, x, y));
                    (cur_x, cur_y) = (x, y);
                    count += 1;
                }
                last_cubic = None;
                last_quad = None;
            }
            b'Z' => {
                segments.push(PathSegment::Close);
                (cur_x, cur_y) = (start_x, start_y);
                last_cubic = None;
                last_quad = None;
                continue;
            }
            _ => {
                tracing::debug!(command = %(command as char), "Unknown path command");
                break;
            }
        }

        if count == 0 {
            tracing::debug!(command = %(command as char), "Path command without arguments");
            break;
        }
    }

    segments
}

/// Endpoint to center conversion for an elliptical arc.
#[allow(clippy::too_many_arguments)]
fn arc_segment(
    x1: f64,
    y1: f64,
    rx: f64,
    ry: f64,
    rotation_deg: f64,
    large_arc: bool,
    sweep: bool,
    x2: f64,
    y2: f64,
) -> PathSegment {
    let mut rx = rx.abs();
    let mut ry = ry.abs();
    if rx == 0.0 || ry == 0.0 || (x1 == x2 && y1 == y2) {
        return PathSegment::LineTo(x2, y2);
    }

    let phi = rotation_deg * PI / 180.0;
    let (sin_phi, cos_phi) = phi.sin_cos();

    // Midpoint in the rotated frame.
    let dx = (x1 - x2) / 2.0;
    let dy = (y1 - y2) / 2.0;
    let x1p = cos_phi * dx + sin_phi * dy;
    let y1p = -sin_phi * dx + cos_phi * dy;

    let lambda = (x1p * x1p) / (rx * rx) + (y1p * y1p) / (ry * ry);
    if lambda > 1.0 {
        let scale = lambda.sqrt();
        rx *= scale;
        ry *= scale;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p * y1p - ry2 * x1p * x1p;
    let den = rx2 * y1p * y1p + ry2 * x1p * x1p;
    let mut coef = if den == 0.0 { 0.0 } else { (num / den).max(0.0).sqrt() };
    if large_arc == sweep {
        coef = -coef;
    }
    let cxp = coef * rx * y1p / ry;
    let cyp = -coef * ry * x1p / rx;

    let cx = cos_phi * cxp - sin_phi * cyp + (x1 + x2) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y1 + y2) / 2.0;

    let start = ((y1p - cyp) / ry).atan2((x1p - cxp) / rx);
    let end = ((-y1p - cyp) / ry).atan2((-x1p - cxp) / rx);

    PathSegment::Arc {
        cx,
        cy,
        rx,
        ry,
        rotation: phi,
        start,
        end,
        anticlockwise: !sweep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawCommand, RecordingCanvas};
    use pretty_assertions::assert_eq;

    #[test]
    fn absolute_and_relative_commands() {
        assert_eq!(
            parse_path_data("M 100 20 L 150 25 l 10 -5 H 200 v 10 Z"),
            vec![
                PathSegment::MoveTo(100.0, 20.0),
                PathSegment::LineTo(150.0, 25.0),
                PathSegment::LineTo(160.0, 20.0),
                PathSegment::LineTo(200.0, 20.0),
                PathSegment::LineTo(200.0, 30.0),
                PathSegment::Close,
            ]
        );
    }

    #[test]
    fn moveto_pairs_become_lines() {
        assert_eq!(
            parse_path_data("m10,10 5,5 5-5z m1 1"),
            vec![
                PathSegment::MoveTo(10.0, 10.0),
                PathSegment::LineTo(15.0, 15.0),
                PathSegment::LineTo(20.0, 10.0),
                PathSegment::Close,
                PathSegment::MoveTo(11.0, 11.0),
            ]
        );
    }

    #[test]
    fn smooth_curves_reflect_control_points() {
        assert_eq!(
            parse_path_data("M0 0 C 0 10 10 10 10 0 S 20 -10 20 0 Q 25 5 30 0 T 40 0"),
            vec![
                PathSegment::MoveTo(0.0, 0.0),
                PathSegment::CubicTo(0.0, 10.0, 10.0, 10.0, 10.0, 0.0),
                PathSegment::CubicTo(10.0, -10.0, 20.0, -10.0, 20.0, 0.0),
                PathSegment::QuadTo(25.0, 5.0, 30.0, 0.0),
                PathSegment::QuadTo(35.0, -5.0, 40.0, 0.0),
            ]
        );
    }

    #[test]
    fn arc_endpoints_become_a_center_arc() {
        let segments = parse_path_data("M 16 28 A 15 15 0 0 0 14 15");
        let PathSegment::Arc {
            cx,
            cy,
            rx,
            start,
            end,
            anticlockwise,
            ..
        } = segments[1]
        else {
            panic!("expected an arc, got {:?}", segments[1]);
        };
        assert!((cx - 1.675).abs() < 0.01, "cx = {cx}");
        assert!((cy - 23.55).abs() < 0.01, "cy = {cy}");
        assert_eq!(rx, 15.0);
        assert!((start - 0.3012).abs() < 0.001, "start = {start}");
        assert!((end + 0.6065).abs() < 0.001, "end = {end}");
        assert!(anticlockwise);
    }

    #[test]
    fn compact_arc_flags() {
        let segments = parse_path_data("M0 0a5 5 0 0110 0");
        assert_eq!(segments.len(), 2);
        assert!(matches!(segments[1], PathSegment::Arc { anticlockwise: false, .. }));
    }

    #[test]
    fn degenerate_arcs_are_lines() {
        assert_eq!(
            parse_path_data("M0 0 A 0 5 0 0 1 10 0")[1],
            PathSegment::LineTo(10.0, 0.0)
        );
    }

    #[test]
    fn malformed_data_keeps_the_prefix() {
        assert_eq!(
            parse_path_data("M 1 2 L 3 4 L x"),
            vec![PathSegment::MoveTo(1.0, 2.0), PathSegment::LineTo(3.0, 4.0)]
        );
    }

    #[test]
    fn replays_onto_a_canvas() {
        let mut canvas = RecordingCanvas::new();
        replay_path(&parse_path_data("M 0 0 A 10 5 0 0 1 20 0 Z"), &mut canvas);
        let commands = canvas.commands();
        assert_eq!(commands[0], DrawCommand::MoveTo { x: 0.0, y: 0.0 });
        assert!(matches!(commands[1], DrawCommand::Ellipse { .. }));
        assert_eq!(commands[2], DrawCommand::ClosePath);
    }
}
