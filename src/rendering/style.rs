//! CSS value parsing for the subset of properties the renderer understands

/// Straight-alpha RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Scale alpha by `opacity` (clamped to 0..=1)
    pub fn with_opacity(self, opacity: f32) -> Self {
        let a = (self.a as f32 * opacity.clamp(0.0, 1.0)).round() as u8;
        Self { a, ..self }
    }

    pub fn is_transparent(self) -> bool {
        self.a == 0
    }

    /// `#rrggbb`, alpha is emitted separately by callers that need it
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn alpha_f32(self) -> f32 {
        self.a as f32 / 255.0
    }

    pub fn lerp(self, other: Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Color::rgba(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
            mix(self.a, other.a),
        )
    }
}

const NAMED_COLORS: &[(&str, Color)] = &[
    ("black", Color::BLACK),
    ("white", Color::WHITE),
    ("transparent", Color::TRANSPARENT),
    ("red", Color::rgba(255, 0, 0, 255)),
    ("green", Color::rgba(0, 128, 0, 255)),
    ("lime", Color::rgba(0, 255, 0, 255)),
    ("blue", Color::rgba(0, 0, 255, 255)),
    ("navy", Color::rgba(0, 0, 128, 255)),
    ("yellow", Color::rgba(255, 255, 0, 255)),
    ("orange", Color::rgba(255, 165, 0, 255)),
    ("purple", Color::rgba(128, 0, 128, 255)),
    ("teal", Color::rgba(0, 128, 128, 255)),
    ("maroon", Color::rgba(128, 0, 0, 255)),
    ("silver", Color::rgba(192, 192, 192, 255)),
    ("gray", Color::rgba(128, 128, 128, 255)),
    ("grey", Color::rgba(128, 128, 128, 255)),
    ("pink", Color::rgba(255, 192, 203, 255)),
];

/// Parse `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb()`/`rgba()` and a few
/// named colors. Returns `None` for anything else (including `currentColor`).
pub fn parse_color(value: &str) -> Option<Color> {
    let v = value.trim().to_ascii_lowercase();
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(inner) = v
        .strip_prefix("rgba(")
        .or_else(|| v.strip_prefix("rgb("))
        .and_then(|s| s.strip_suffix(')'))
    {
        return parse_rgb_function(inner);
    }
    NAMED_COLORS.iter().find(|(n, _)| *n == v).map(|(_, c)| *c)
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|n| n * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Color::rgba(nibble(0)?, nibble(1)?, nibble(2)?, 255)),
        4 => Some(Color::rgba(nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
        6 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

fn parse_rgb_function(inner: &str) -> Option<Color> {
    let parts: Vec<&str> = inner
        .split([',', '/', ' '])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |p: &str| -> Option<u8> {
        let n = match p.strip_suffix('%') {
            Some(pct) => pct.parse::<f32>().ok()? * 2.55,
            None => p.parse::<f32>().ok()?,
        };
        Some(n.clamp(0.0, 255.0).round() as u8)
    };
    let alpha = match parts.get(3) {
        Some(p) => {
            let a = match p.strip_suffix('%') {
                Some(pct) => pct.parse::<f32>().ok()? / 100.0,
                None => p.parse::<f32>().ok()?,
            };
            (a.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        None => 255,
    };
    Some(Color::rgba(channel(parts[0])?, channel(parts[1])?, channel(parts[2])?, alpha))
}

/// Parse a pixel length (`12px`, `12`, `0`). Relative units are unsupported.
pub fn parse_length(value: &str) -> Option<f32> {
    let v = value.trim();
    let num = v.strip_suffix("px").unwrap_or(v).trim();
    num.parse::<f32>().ok().filter(|n| n.is_finite())
}

/// Parse a single CSS time (`0.3s`, `300ms`) into milliseconds
pub fn parse_time_ms(value: &str) -> Option<f64> {
    let v = value.trim();
    if let Some(ms) = v.strip_suffix("ms") {
        return ms.trim().parse::<f64>().ok();
    }
    if let Some(s) = v.strip_suffix('s') {
        return s.trim().parse::<f64>().ok().map(|s| s * 1000.0);
    }
    if v == "0" {
        return Some(0.0);
    }
    None
}

/// Parse a comma-separated time list; unparsable entries count as zero
pub fn parse_time_list(value: &str) -> Vec<f64> {
    split_top_level(value, ',')
        .iter()
        .map(|item| parse_time_ms(item).unwrap_or(0.0))
        .collect()
}

/// Split on `sep` outside parentheses, trimming each piece
pub fn split_top_level(value: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for ch in value.chars() {
        match ch {
            '(' => {
                depth += 1;
                cur.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                cur.push(ch);
            }
            c if depth == 0 && (c == sep || (sep == ' ' && c.is_whitespace())) => {
                if !cur.trim().is_empty() {
                    out.push(cur.trim().to_string());
                }
                cur.clear();
            }
            _ => cur.push(ch),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub offset: f32,
    pub color: Color,
}

/// `linear-gradient()` with CSS angle semantics (0deg points up, 90deg right)
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradient {
    pub angle_deg: f32,
    pub stops: Vec<ColorStop>,
}

impl LinearGradient {
    /// Color at position `t` along the gradient line
    pub fn color_at(&self, t: f32) -> Color {
        let Some(first) = self.stops.first() else {
            return Color::TRANSPARENT;
        };
        if t <= first.offset {
            return first.color;
        }
        for pair in self.stops.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b.offset {
                let span = b.offset - a.offset;
                if span <= f32::EPSILON {
                    return b.color;
                }
                return a.color.lerp(b.color, (t - a.offset) / span);
            }
        }
        self.stops.last().map(|s| s.color).unwrap_or(first.color)
    }

    /// Unit direction of the gradient line in y-down coordinates
    pub fn direction(&self) -> (f32, f32) {
        let rad = self.angle_deg.to_radians();
        (rad.sin(), -rad.cos())
    }

    /// Half length of the gradient line for a `width` x `height` box
    pub fn half_length(&self, width: f32, height: f32) -> f32 {
        let (dx, dy) = self.direction();
        (width * dx.abs() + height * dy.abs()) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Solid(Color),
    Linear(LinearGradient),
}

/// Parse `background` / `background-color` / `background-image` values
pub fn parse_background(value: &str) -> Option<Fill> {
    let v = value.trim();
    if let Some(start) = v.find("linear-gradient(") {
        let args_start = start + "linear-gradient(".len();
        let mut depth = 1usize;
        for (i, ch) in v[args_start..].char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return parse_linear_gradient(&v[args_start..args_start + i]);
                    }
                }
                _ => {}
            }
        }
        return None;
    }
    if let Some(c) = parse_color(v) {
        return Some(Fill::Solid(c));
    }
    split_top_level(v, ' ')
        .iter()
        .find_map(|tok| parse_color(tok))
        .map(Fill::Solid)
}

fn parse_linear_gradient(args: &str) -> Option<Fill> {
    let mut parts = split_top_level(args, ',');
    if parts.is_empty() {
        return None;
    }
    let mut angle = 180.0;
    if let Some(a) = parse_gradient_direction(&parts[0]) {
        angle = a;
        parts.remove(0);
    }
    let mut raw: Vec<(Color, Option<f32>)> = Vec::new();
    for part in &parts {
        let toks = split_top_level(part, ' ');
        let (color, offset) = match toks.as_slice() {
            [c] => (parse_color(c)?, None),
            [c, pos, ..] => {
                let off = pos.strip_suffix('%').and_then(|p| p.parse::<f32>().ok()).map(|p| p / 100.0);
                (parse_color(c)?, off)
            }
            [] => continue,
        };
        raw.push((color, offset));
    }
    match raw.len() {
        0 => None,
        1 => Some(Fill::Solid(raw[0].0)),
        n => {
            let stops = raw
                .iter()
                .enumerate()
                .map(|(i, (color, off))| ColorStop {
                    offset: off.unwrap_or(i as f32 / (n - 1) as f32).clamp(0.0, 1.0),
                    color: *color,
                })
                .collect();
            Some(Fill::Linear(LinearGradient { angle_deg: angle, stops }))
        }
    }
}

fn parse_gradient_direction(value: &str) -> Option<f32> {
    let v = value.trim().to_ascii_lowercase();
    if let Some(deg) = v.strip_suffix("deg") {
        return deg.trim().parse::<f32>().ok();
    }
    if let Some(turn) = v.strip_suffix("turn") {
        return turn.trim().parse::<f32>().ok().map(|t| t * 360.0);
    }
    let side = v.strip_prefix("to ")?;
    let mut words: Vec<&str> = side.split_whitespace().collect();
    words.sort_unstable();
    let angle = match words.as_slice() {
        ["top"] => 0.0,
        ["right"] => 90.0,
        ["bottom"] => 180.0,
        ["left"] => 270.0,
        ["right", "top"] => 45.0,
        ["bottom", "right"] => 135.0,
        ["bottom", "left"] => 225.0,
        ["left", "top"] => 315.0,
        _ => return None,
    };
    Some(angle)
}

/// Parse a `border` shorthand into width and color. `none`/zero width yields `None`.
pub fn parse_border(value: &str) -> Option<(f32, Color)> {
    let mut width = None;
    let mut color = Color::BLACK;
    let mut styled = false;
    for tok in split_top_level(value, ' ') {
        let t = tok.to_ascii_lowercase();
        if t == "none" || t == "hidden" {
            return None;
        }
        if matches!(t.as_str(), "solid" | "dashed" | "dotted" | "double" | "groove" | "ridge" | "inset" | "outset") {
            styled = true;
        } else if let Some(w) = parse_length(&t) {
            width = Some(w);
        } else if let Some(c) = parse_color(&t) {
            color = c;
        }
    }
    match width {
        Some(w) if w > 0.0 && styled => Some((w, color)),
        _ => None,
    }
}

/// One layer of a `box-shadow` list, in logical pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShadow {
    pub offset_x: f32,
    pub offset_y: f32,
    pub blur: f32,
    pub spread: f32,
    pub color: Color,
    pub inset: bool,
}

/// Parse a `box-shadow` list, first layer first. `none` and malformed layers
/// yield nothing; a layer without a color is black.
pub fn parse_box_shadow(value: &str) -> Vec<BoxShadow> {
    split_top_level(value, ',')
        .iter()
        .filter_map(|layer| parse_shadow_layer(layer))
        .collect()
}

fn parse_shadow_layer(layer: &str) -> Option<BoxShadow> {
    let mut lengths = Vec::new();
    let mut color = None;
    let mut inset = false;
    for tok in split_top_level(layer, ' ') {
        if tok.eq_ignore_ascii_case("inset") {
            inset = true;
        } else if let Some(len) = parse_length(&tok) {
            lengths.push(len);
        } else if let Some(c) = parse_color(&tok) {
            color = Some(c);
        } else {
            return None;
        }
    }
    if !(2..=4).contains(&lengths.len()) {
        return None;
    }
    Some(BoxShadow {
        offset_x: lengths[0],
        offset_y: lengths[1],
        blur: lengths.get(2).copied().unwrap_or(0.0).max(0.0),
        spread: lengths.get(3).copied().unwrap_or(0.0),
        color: color.unwrap_or(Color::BLACK),
        inset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_functional_colors() {
        assert_eq!(parse_color("#fff"), Some(Color::WHITE));
        assert_eq!(parse_color("#D4D6D8"), Some(Color::rgba(0xd4, 0xd6, 0xd8, 255)));
        assert_eq!(parse_color("#00000080"), Some(Color::rgba(0, 0, 0, 128)));
        assert_eq!(parse_color("rgba(0,0,0,0.5)"), Some(Color::rgba(0, 0, 0, 128)));
        assert_eq!(parse_color("rgb(255 128 0 / 50%)"), Some(Color::rgba(255, 128, 0, 128)));
        assert_eq!(parse_color("Transparent"), Some(Color::TRANSPARENT));
        assert_eq!(parse_color("currentColor"), None);
        assert_eq!(parse_color("#ggg"), None);
    }

    #[test]
    fn parses_time_lists() {
        assert_eq!(parse_time_ms("0.3s"), Some(300.0));
        assert_eq!(parse_time_ms("250ms"), Some(250.0));
        assert_eq!(parse_time_list("0.2s, 1s,bogus"), vec![200.0, 1000.0, 0.0]);
    }

    #[test]
    fn parses_gradients_with_and_without_offsets() {
        let fill = parse_background("linear-gradient(to right, #000, rgba(255, 255, 255, 1) 100%)").unwrap();
        let Fill::Linear(g) = fill else { panic!("expected gradient") };
        assert_eq!(g.angle_deg, 90.0);
        assert_eq!(g.stops.len(), 2);
        assert_eq!(g.stops[0].offset, 0.0);
        assert_eq!(g.color_at(0.5), Color::rgba(128, 128, 128, 255));

        let Some(Fill::Linear(g)) = parse_background("linear-gradient(#f00, #0f0, #00f)") else {
            panic!("expected gradient")
        };
        assert_eq!(g.angle_deg, 180.0);
        assert_eq!(g.stops[1].offset, 0.5);
    }

    #[test]
    fn background_shorthand_picks_first_color() {
        assert_eq!(
            parse_background("#E7E7E3 url(noise.png) no-repeat"),
            Some(Fill::Solid(Color::rgba(0xe7, 0xe7, 0xe3, 255)))
        );
        assert_eq!(parse_background("url(a.png)"), None);
    }

    #[test]
    fn border_requires_style_and_width() {
        assert_eq!(parse_border("2px solid #000"), Some((2.0, Color::BLACK)));
        assert_eq!(parse_border("none"), None);
        assert_eq!(parse_border("2px #000"), None);
    }

    #[test]
    fn gradient_direction_vectors() {
        let g = LinearGradient { angle_deg: 180.0, stops: vec![] };
        let (dx, dy) = g.direction();
        assert!(dx.abs() < 1e-6 && (dy - 1.0).abs() < 1e-6);
        assert!((g.half_length(100.0, 40.0) - 20.0).abs() < 1e-3);
    }

    #[test]
    fn parses_layered_box_shadows() {
        let layers = parse_box_shadow(
            "0 8px 12px -12px rgba(0, 0, 0, 0.26), inset 0 1px 0 rgba(255,255,255,0.92), 2px 3px",
        );
        assert_eq!(layers.len(), 3);
        assert_eq!(
            layers[0],
            BoxShadow {
                offset_x: 0.0,
                offset_y: 8.0,
                blur: 12.0,
                spread: -12.0,
                color: Color::rgba(0, 0, 0, 66),
                inset: false,
            }
        );
        assert!(layers[1].inset);
        assert_eq!(layers[1].color, Color::rgba(255, 255, 255, 235));
        assert_eq!((layers[2].blur, layers[2].color), (0.0, Color::BLACK));

        assert!(parse_box_shadow("none").is_empty());
        assert!(parse_box_shadow("1px").is_empty());
    }
}
