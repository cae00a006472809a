use std::f64::consts::PI;

use pretty_assertions::assert_eq;

use super::*;
use crate::canvas::{Font, LineCap, LineJoin};

const SVG_START: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="500" height="250">"#;

/// Commands for `body`, without the leading margin translate.
fn draw(body: &str) -> Vec<DrawCommand> {
    let markup = format!("{SVG_START}{body}</svg>");
    let commands = record_svg(&markup, &RenderOptions::default()).unwrap();
    assert_eq!(commands[0], DrawCommand::Translate { x: 0.0, y: 0.0 });
    commands[1..].to_vec()
}

fn hex(value: u32) -> Color {
    Color::rgb((value >> 16) as u8, (value >> 8) as u8, value as u8)
}

fn fill(color: Color, alpha: f64) -> DrawCommand {
    DrawCommand::Fill(FillStyle {
        paint: Paint::Color(color),
        global_alpha: alpha,
        shadow: None,
    })
}

fn stroke_style(color: Color, width: f64, alpha: f64) -> StrokeStyle {
    StrokeStyle {
        color,
        line_width: width,
        line_join: LineJoin::Miter,
        line_cap: LineCap::Butt,
        dash: Vec::new(),
        global_alpha: alpha,
    }
}

fn texts(commands: &[DrawCommand]) -> Vec<(String, f64, f64)> {
    commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::FillText { text, x, y, .. } => Some((text.clone(), *x, *y)),
            _ => None,
        })
        .collect()
}

fn count(commands: &[DrawCommand], wanted: &DrawCommand) -> usize {
    commands.iter().filter(|c| *c == wanted).count()
}

#[test]
fn path_with_only_a_stroke() {
    let commands =
        draw("<path d='M 36 181 L 184 98 L 331 280' stroke-width='2' stroke='#FF0000'/>");
    assert_eq!(
        commands,
        vec![
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 36.0, y: 181.0 },
            DrawCommand::LineTo { x: 184.0, y: 98.0 },
            DrawCommand::LineTo { x: 331.0, y: 280.0 },
            DrawCommand::Stroke(stroke_style(hex(0xff0000), 2.0, 1.0)),
        ]
    );
}

#[test]
fn fill_none_overrides_the_group() {
    let commands = draw(
        "<g fill='#FF0000'><path d='M 0 0 L 10 10' fill='none' stroke='#955f71' stroke-width='2'/></g>",
    );
    assert!(!commands.iter().any(|c| matches!(c, DrawCommand::Fill(_))));
    assert_eq!(
        commands.last(),
        Some(&DrawCommand::Stroke(stroke_style(hex(0x955f71), 2.0, 1.0)))
    );
}

#[test]
fn rect_with_transform_and_dashes() {
    let commands = draw(
        "<rect x='81' y='24' width='118' height='168' transform='translate(250,230)' \
         stroke-dasharray='8,6' opacity='0.5' stroke-width='12' stroke='#955f71' fill='#955f71'/>",
    );
    let color = hex(0x955f71);
    assert_eq!(
        commands,
        vec![
            DrawCommand::Save,
            DrawCommand::Translate { x: 250.0, y: 230.0 },
            DrawCommand::BeginPath,
            DrawCommand::Rect {
                x: 81.0,
                y: 24.0,
                width: 118.0,
                height: 168.0,
            },
            fill(color, 0.5),
            DrawCommand::Stroke(StrokeStyle {
                dash: vec![8.0, 6.0],
                ..stroke_style(color, 12.0, 0.5)
            }),
            DrawCommand::Restore,
        ]
    );
}

#[test]
fn rounded_rect_radius_is_clamped() {
    let commands = draw("<rect x='10' y='20' width='100' height='40' rx='30' fill='black'/>");
    assert_eq!(
        commands,
        vec![
            DrawCommand::BeginPath,
            DrawCommand::Save,
            DrawCommand::Translate { x: 10.0, y: 20.0 },
            DrawCommand::MoveTo { x: 20.0, y: 0.0 },
            DrawCommand::ArcTo { x1: 100.0, y1: 0.0, x2: 100.0, y2: 40.0, radius: 20.0 },
            DrawCommand::ArcTo { x1: 100.0, y1: 40.0, x2: 0.0, y2: 40.0, radius: 20.0 },
            DrawCommand::ArcTo { x1: 0.0, y1: 40.0, x2: 0.0, y2: 0.0, radius: 20.0 },
            DrawCommand::ArcTo { x1: 0.0, y1: 0.0, x2: 20.0, y2: 0.0, radius: 20.0 },
            DrawCommand::ClosePath,
            DrawCommand::Restore,
            fill(Color::BLACK, 1.0),
        ]
    );
}

#[test]
fn opacity_multiplies_fill_and_stroke_opacity() {
    let commands = draw(
        "<rect x='21' y='100' width='118' height='30' stroke-width='7' stroke-opacity='0.7' \
         fill-opacity='0.5' opacity='0.5' stroke='#955f71' fill='#955f71'/>",
    );
    let fill_alpha = commands.iter().find_map(|c| match c {
        DrawCommand::Fill(style) => Some(style.global_alpha),
        _ => None,
    });
    let stroke_alpha = commands.iter().find_map(|c| match c {
        DrawCommand::Stroke(style) => Some(style.global_alpha),
        _ => None,
    });
    assert!((fill_alpha.unwrap() - 0.25).abs() < 1e-9);
    assert!((stroke_alpha.unwrap() - 0.35).abs() < 1e-9);
}

#[test]
fn filter_becomes_a_fill_shadow() {
    let commands = draw(
        "<defs><filter id='shadow'><feGaussianBlur stdDeviation='1'/><feOffset dx='0' dy='1'/>\
         <feFlood flood-color='#223387' flood-opacity='0.2'/></filter></defs>\
         <circle cx='0' cy='0' r='4' filter='url(#shadow)' fill='#ba4d51'/>\
         <circle cx='20' cy='20' r='4' filter='url(someurl#missing)' fill='#ba4d51'/>",
    );
    let shadows: Vec<Option<Shadow>> = commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::Fill(style) => Some(style.shadow.clone()),
            _ => None,
        })
        .collect();
    let expected = Shadow {
        blur: 1.0,
        color: Color::rgba(34, 51, 135, 0.2),
        offset_x: 0.0,
        offset_y: 1.0,
    };
    assert_eq!(shadows, vec![Some(expected), None]);
    assert_eq!(Color::rgba(34, 51, 135, 0.2).to_string(), "rgba(34, 51, 135, 0.2)");
}

#[test]
fn circle_is_a_full_arc() {
    let commands = draw("<circle cx='0' cy='0' r='140' fill='#F05B41'/>");
    assert_eq!(
        commands,
        vec![
            DrawCommand::BeginPath,
            DrawCommand::Arc {
                x: 0.0,
                y: 0.0,
                radius: 140.0,
                start_angle: 0.0,
                end_angle: 2.0 * PI,
                anticlockwise: true,
            },
            fill(hex(0xf05b41), 1.0),
        ]
    );
}

#[test]
fn polygon_closes_and_lines_never_fill() {
    let commands = draw(
        "<polygon points='220,10 300,210 170,250' style='fill:lime;stroke:purple;stroke-width:1'/>\
         <line x1='0' y1='0' x2='5' y2='5' stroke='black' fill='red'/>",
    );
    assert_eq!(
        commands,
        vec![
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 220.0, y: 10.0 },
            DrawCommand::LineTo { x: 300.0, y: 210.0 },
            DrawCommand::LineTo { x: 170.0, y: 250.0 },
            DrawCommand::ClosePath,
            fill(hex(0x00ff00), 1.0),
            DrawCommand::Stroke(stroke_style(hex(0x800080), 1.0, 1.0)),
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 0.0, y: 0.0 },
            DrawCommand::LineTo { x: 5.0, y: 5.0 },
            DrawCommand::Stroke(stroke_style(Color::BLACK, 1.0, 1.0)),
        ]
    );
}

#[test]
fn text_carries_font_and_alignment() {
    let commands = draw(
        "<text x='20' y='30' text-anchor='middle' style=\"font-style: italic; font-size:16px; \
         font-family:'Segoe UI Light', 'Trebuchet MS', Verdana; font-weight:bold; fill:#232323; \
         opacity: 0.3;\">Test</text>",
    );
    assert_eq!(
        commands,
        vec![DrawCommand::FillText {
            text: "Test".into(),
            x: 20.0,
            y: 30.0,
            style: TextStyle {
                font: Font {
                    family: "\"Segoe UI Light\",\"Trebuchet MS\",Verdana".into(),
                    size: 16.0,
                    weight: "bold".into(),
                    style: "italic".into(),
                },
                align: TextAlign::Center,
                color: hex(0x232323),
                global_alpha: 0.3,
            },
        }]
    );
}

#[test]
fn tspans_advance_the_cursor() {
    // Default font is 10px and glyphs advance half the size, so every run is 50 wide.
    let commands = draw(
        "<text x='0' y='50'>test part1<tspan>test part2</tspan>\
         <tspan dx='15' dy='15'>test part3</tspan>test part4\
         <tspan x='200' y='200'>test part5</tspan><tspan x='0'>test part6</tspan>\
         <tspan y='0'>test part7</tspan></text>",
    );
    let expected: Vec<(String, f64, f64)> = vec![
        ("test part1".into(), 0.0, 50.0),
        ("test part2".into(), 50.0, 50.0),
        ("test part3".into(), 115.0, 65.0),
        ("test part4".into(), 165.0, 65.0),
        ("test part5".into(), 200.0, 200.0),
        ("test part6".into(), 0.0, 200.0),
        ("test part7".into(), 50.0, 0.0),
    ];
    assert_eq!(texts(&commands), expected);
}

#[test]
fn multi_line_text_uses_dy() {
    let commands = draw(
        "<text x='50' y='50' style='font-size:28px'><tspan x='0' y='30'>Male</tspan>\
         <tspan style='font-size:30px;' x='0' dy='28'>Age</tspan></text>",
    );
    assert_eq!(
        texts(&commands),
        vec![("Male".to_string(), 0.0, 30.0), ("Age".to_string(), 0.0, 58.0)]
    );
}

#[test]
fn stroke_text_follows_fill_text() {
    let commands = draw(
        "<text x='50' y='50' text-anchor='middle' stroke-width='5' style=\"fill:#222; \
         font-family:'Trebuchet MS', Verdana; stroke: #F2f2f2; stroke-width: 5px;\">\
         <tspan style='font-weight: bold; font-style: italic;' stroke-opacity='0.7'>Age</tspan></text>",
    );
    let font = Font {
        family: "\"Trebuchet MS\",Verdana".into(),
        size: 10.0,
        weight: "bold".into(),
        style: "italic".into(),
    };
    assert_eq!(
        commands,
        vec![
            DrawCommand::FillText {
                text: "Age".into(),
                x: 50.0,
                y: 50.0,
                style: TextStyle {
                    font: font.clone(),
                    align: TextAlign::Center,
                    color: hex(0x222222),
                    global_alpha: 1.0,
                },
            },
            DrawCommand::StrokeText {
                text: "Age".into(),
                x: 50.0,
                y: 50.0,
                font,
                align: TextAlign::Center,
                style: stroke_style(hex(0xf2f2f2), 5.0, 0.7),
            },
        ]
    );
}

#[test]
fn whitespace_runs_collapse_and_titles_are_skipped() {
    let commands = draw(
        "<text x='48' y='393'><tspan x='48' y='393'>      </tspan><tspan>Sold in Coal</tspan>\
         <tspan x='48' dy='12'>      204.8 retained</tspan></text>\
         <text x='50' y='30'>Test...<title>Test test</title></text>",
    );
    let runs: Vec<String> = texts(&commands).into_iter().map(|(t, _, _)| t).collect();
    assert_eq!(runs, vec![" ", "Sold in Coal", " 204.8 retained", "Test..."]);
}

#[test]
fn text_decorations_are_filled_rects() {
    let commands = draw(
        "<text x='0' y='90'><tspan x='500' text-anchor='end' \
         style='text-decoration:underline; font-size:40px; fill:#23FF23;'>Underlined</tspan></text>",
    );
    // 10 glyphs at 40px are 200 wide and the line is 2 thick.
    assert_eq!(
        commands[1..].to_vec(),
        vec![
            DrawCommand::BeginPath,
            DrawCommand::Rect {
                x: 300.0,
                y: 92.0,
                width: 200.0,
                height: 2.0,
            },
            fill(hex(0x23ff23), 1.0),
        ]
    );

    let invisible =
        draw("<text x='0' y='0' fill='none' style='text-decoration:line-through'>x</text>");
    assert!(invisible.is_empty());
}

#[test]
fn nested_translates_save_and_restore() {
    let commands = draw(
        "<g transform='translate(10,10)'><g transform='translate(20,20)'>\
         <rect transform='translate(30,30)' x='0' y='0' width='50' height='50' fill='#FF0000'/>\
         <rect transform='translate(60,0)' x='0' y='0' width='50' height='50' fill='#0000FF'/></g>\
         <g transform='translate(40,0)'>\
         <rect transform='translate(30,30)' x='0' y='0' width='50' height='50' fill='#00FF00'/></g></g>",
    );
    let translates: Vec<(f64, f64)> = commands
        .iter()
        .filter_map(|c| match c {
            DrawCommand::Translate { x, y } => Some((*x, *y)),
            _ => None,
        })
        .collect();
    assert_eq!(
        translates,
        vec![(10.0, 10.0), (20.0, 20.0), (30.0, 30.0), (60.0, 0.0), (40.0, 0.0), (30.0, 30.0)]
    );
    assert_eq!(count(&commands, &DrawCommand::Save), 6);
    assert_eq!(count(&commands, &DrawCommand::Restore), 6);
}

#[test]
fn rotation_about_a_point() {
    let commands = draw(
        "<path d='M 150 125 L 300 125' transform='translate(0.5,0.5) rotate(330,300,125)' \
         stroke='#d3d3d3' stroke-width='1'/>",
    );
    assert_eq!(
        commands[..5].to_vec(),
        vec![
            DrawCommand::Save,
            DrawCommand::Translate { x: 0.5, y: 0.5 },
            DrawCommand::Translate { x: 300.0, y: 125.0 },
            DrawCommand::Rotate {
                angle: 330.0 * PI / 180.0,
            },
            DrawCommand::Translate { x: -300.0, y: -125.0 },
        ]
    );
    assert_eq!(commands.last(), Some(&DrawCommand::Restore));
}

#[test]
fn clip_path_is_applied_before_drawing() {
    let commands = draw(
        "<defs><clipPath id='clip13'><rect x='62' y='78' width='736' height='309' \
         transform='translate(0,0)'/></clipPath></defs>\
         <g fill='#00ced1' stroke='#00ced1' stroke-width='0' clip-path='url(#clip13)'>\
         <circle cx='0' cy='0' r='28' opacity='0.5' transform='translate(404,245)'/></g>",
    );
    assert_eq!(
        commands,
        vec![
            DrawCommand::Save,
            DrawCommand::BeginPath,
            DrawCommand::Save,
            DrawCommand::Translate { x: 0.0, y: 0.0 },
            DrawCommand::Rect {
                x: 62.0,
                y: 78.0,
                width: 736.0,
                height: 309.0,
            },
            DrawCommand::Restore,
            DrawCommand::ClosePath,
            DrawCommand::Clip,
            DrawCommand::Save,
            DrawCommand::Translate { x: 404.0, y: 245.0 },
            DrawCommand::BeginPath,
            DrawCommand::Arc {
                x: 0.0,
                y: 0.0,
                radius: 28.0,
                start_angle: 0.0,
                end_angle: 2.0 * PI,
                anticlockwise: true,
            },
            fill(hex(0x00ced1), 0.5),
            DrawCommand::Restore,
            DrawCommand::Restore,
        ]
    );
}

#[test]
fn clip_references_may_carry_a_document_prefix() {
    let commands = draw(
        "<defs><clipPath id='clippath1-part-1'><rect x='0' y='0' width='500' height='30'/></clipPath></defs>\
         <path d='M 100 10 L 150 15' clip-path='url(someurl#clippath1-part-1)' stroke='#FF0000'/>",
    );
    assert_eq!(count(&commands, &DrawCommand::Clip), 1);
    assert_eq!(commands.first(), Some(&DrawCommand::Save));
    assert_eq!(commands.last(), Some(&DrawCommand::Restore));
}

#[test]
fn pattern_fill_records_the_tile() {
    let commands = draw(
        "<defs><pattern id='hatch' width='6' height='6'>\
         <rect x='0' y='0' width='6' height='6' fill='#ffa500' opacity='0.75'/>\
         <path d='M 3 -3 L -3 3' stroke-width='2' stroke='#ffa500'/></pattern></defs>\
         <rect x='10' y='10' width='70' height='150' stroke-width='0' fill='url(someurl#hatch)' stroke='#ffa500'/>",
    );
    let orange = hex(0xffa500);
    let tile = Pattern {
        width: 6.0,
        height: 6.0,
        commands: vec![
            DrawCommand::BeginPath,
            DrawCommand::Rect {
                x: 0.0,
                y: 0.0,
                width: 6.0,
                height: 6.0,
            },
            fill(orange, 0.75),
            DrawCommand::BeginPath,
            DrawCommand::MoveTo { x: 3.0, y: -3.0 },
            DrawCommand::LineTo { x: -3.0, y: 3.0 },
            DrawCommand::Stroke(stroke_style(orange, 2.0, 1.0)),
        ],
    };
    assert_eq!(
        commands,
        vec![
            DrawCommand::BeginPath,
            DrawCommand::Rect {
                x: 10.0,
                y: 10.0,
                width: 70.0,
                height: 150.0,
            },
            DrawCommand::Fill(FillStyle {
                paint: Paint::Pattern(tile),
                global_alpha: 1.0,
                shadow: None,
            }),
        ]
    );
}

#[test]
fn hidden_groups_still_draw_visible_children() {
    let commands = draw(
        "<g visibility='hidden'><rect x='20' y='20' width='200' height='200' fill='#FF0000'/>\
         <rect x='50' y='50' width='200' height='200' fill='#00FF00' visibility='visible'/></g>",
    );
    assert_eq!(
        commands,
        vec![
            DrawCommand::BeginPath,
            DrawCommand::Rect {
                x: 50.0,
                y: 50.0,
                width: 200.0,
                height: 200.0,
            },
            fill(hex(0x00ff00), 1.0),
        ]
    );
}

#[test]
fn use_draws_the_referenced_element() {
    let commands = draw(
        "<defs><rect id='dot' width='5' height='5' fill='black'/></defs><use xlink:href='#dot' x='10' y='20'/>",
    );
    assert_eq!(
        commands,
        vec![
            DrawCommand::Save,
            DrawCommand::Translate { x: 10.0, y: 20.0 },
            DrawCommand::BeginPath,
            DrawCommand::Rect {
                x: 0.0,
                y: 0.0,
                width: 5.0,
                height: 5.0,
            },
            fill(Color::BLACK, 1.0),
            DrawCommand::Restore,
        ]
    );
}

#[test]
fn images_keep_their_href() {
    let commands =
        draw("<image xlink:href='logo.png' x='1' y='2' width='30' height='40' opacity='0.5'/>");
    assert_eq!(
        commands,
        vec![DrawCommand::DrawImage {
            href: "logo.png".into(),
            x: 1.0,
            y: 2.0,
            width: 30.0,
            height: 40.0,
            global_alpha: 0.5,
        }]
    );
}

#[test]
fn background_covers_the_margins() {
    let markup = format!("{SVG_START}</svg>");
    let options = RenderOptions {
        margin_x: 30.0,
        margin_y: 20.0,
        background: Some(hex(0xff0000)),
        ..Default::default()
    };
    let commands = record_svg(&markup, &options).unwrap();
    assert_eq!(
        commands,
        vec![
            DrawCommand::Translate { x: 30.0, y: 20.0 },
            DrawCommand::FillRect {
                x: -30.0,
                y: -20.0,
                width: 560.0,
                height: 290.0,
                style: FillStyle::color(hex(0xff0000)),
            },
        ]
    );

    let sized = RenderOptions {
        width: Some(560.0),
        height: Some(290.0),
        ..options
    };
    let commands = record_svg(&markup, &sized).unwrap();
    assert!(matches!(
        commands[1],
        DrawCommand::FillRect { width: 620.0, height: 330.0, .. }
    ));
}

#[test]
fn view_box_scales_the_drawing() {
    let markup = "<svg xmlns='http://www.w3.org/2000/svg' width='200' height='100' viewBox='0 0 100 50'>\
                  <rect width='10' height='10' fill='black'/></svg>";
    let commands = record_svg(markup, &RenderOptions::default()).unwrap();
    assert_eq!(
        commands[1],
        DrawCommand::Transform(Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0))
    );
}

#[test]
fn invalid_documents_are_rejected() {
    let options = RenderOptions::default();
    assert_eq!(record_svg("<html/>", &options), Err(SvgError::MissingRoot));
    assert!(matches!(record_svg("<svg", &options), Err(SvgError::Xml(_))));
    assert_eq!(
        record_svg("<svg width='-5' height='10'/>", &options),
        Err(SvgError::InvalidSize {
            width: -5.0,
            height: 10.0,
        })
    );
}
