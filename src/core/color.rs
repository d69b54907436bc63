// src/core/color.rs
use crate::config::ColorRules;
use crate::model::RunColor;

/// A run colour after applying theme, tint, shade and highlight fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColor {
    /// Uppercase RGB hex.
    pub hex: String,
    /// Theme slot the colour came from, if any.
    pub theme: Option<String>,
}

/// Named highlight colours of WordprocessingML.
const HIGHLIGHTS: &[(&str, &str)] = &[
    ("yellow", "FFFF00"),
    ("green", "00FF00"),
    ("cyan", "00FFFF"),
    ("magenta", "FF00FF"),
    ("blue", "0000FF"),
    ("red", "FF0000"),
    ("darkBlue", "000080"),
    ("darkCyan", "008080"),
    ("darkGreen", "008000"),
    ("darkMagenta", "800080"),
    ("darkRed", "800000"),
    ("darkYellow", "808000"),
    ("darkGray", "808080"),
    ("lightGray", "C0C0C0"),
    ("black", "000000"),
    ("white", "FFFFFF"),
];

/// Canonical theme slot for the names runs may use.
pub fn theme_slot(name: &str) -> &str {
    match name {
        "text1" | "dark1" => "dk1",
        "background1" | "light1" => "lt1",
        "text2" | "dark2" => "dk2",
        "background2" | "light2" => "lt2",
        "hyperlink" => "hlink",
        "followedHyperlink" => "folHlink",
        other => other,
    }
}

pub fn resolve_color<'t>(
    color: &RunColor,
    theme_lookup: impl Fn(&str) -> Option<&'t str>,
) -> Option<ResolvedColor> {
    if let Some(hex) = color.explicit.as_deref().and_then(normalize_hex) {
        return Some(ResolvedColor { hex, theme: None });
    }

    if let Some(name) = color.theme.as_deref() {
        if let Some(base) = theme_lookup(theme_slot(name)).and_then(normalize_hex) {
            let hex = match (color.tint, color.shade) {
                (None, None) => base,
                (tint, shade) => adjust(&base, tint, shade).unwrap_or(base),
            };
            return Some(ResolvedColor {
                hex,
                theme: Some(name.to_string()),
            });
        }
    }

    let highlight = color.highlight.as_deref().and_then(|name| {
        HIGHLIGHTS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, hex)| hex.to_string())
    });
    highlight
        .or_else(|| color.fill.as_deref().and_then(normalize_hex))
        .map(|hex| ResolvedColor { hex, theme: None })
}

/// Uppercase six-digit hex, or `None` for `auto` and garbage.
pub fn normalize_hex(value: &str) -> Option<String> {
    let v = value.trim().trim_start_matches('#');
    (v.len() == 6 && v.chars().all(|c| c.is_ascii_hexdigit())).then(|| v.to_ascii_uppercase())
}

fn rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Tint moves toward white, shade toward black, both linearly.
fn adjust(hex: &str, tint: Option<u8>, shade: Option<u8>) -> Option<String> {
    let (r, g, b) = rgb(hex)?;
    let apply = |c: u8| -> u8 {
        let mut v = c as f64;
        if let Some(t) = tint {
            let t = t as f64 / 255.0;
            v = v * t + 255.0 * (1.0 - t);
        }
        if let Some(s) = shade {
            v *= s as f64 / 255.0;
        }
        v.round().clamp(0.0, 255.0) as u8
    };
    Some(format!("{:02X}{:02X}{:02X}", apply(r), apply(g), apply(b)))
}

/// Hue in degrees, saturation and value in `0..=1`.
fn hsv(hex: &str) -> Option<(f64, f64, f64)> {
    let (r, g, b) = rgb(hex)?;
    let (r, g, b) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    Some((hue, saturation, max))
}

fn hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Maps resolved colours to output classes.
pub struct ColorClassifier<'a> {
    rules: &'a ColorRules,
}

impl<'a> ColorClassifier<'a> {
    pub fn new(rules: &'a ColorRules) -> Self {
        Self { rules }
    }

    pub fn classify(&self, color: &ResolvedColor) -> Option<String> {
        if let Some(class) = self.rules.exact.get(&color.hex) {
            return Some(class.clone());
        }
        if let Some(class) = color
            .theme
            .as_deref()
            .and_then(|name| self.rules.theme.get(name))
        {
            return Some(class.clone());
        }
        let (hue, saturation, value) = hsv(&color.hex)?;
        self.rules
            .tolerance
            .iter()
            .find(|rule| {
                saturation >= rule.min_saturation
                    && value >= rule.min_value
                    && hue_distance(hue, rule.hue) <= rule.hue_tolerance
            })
            .map(|rule| rule.class.clone())
    }

    /// Classifies a raw hex string; an existing class name maps to itself.
    pub fn classify_value(&self, value: &str) -> Option<String> {
        if let Some(hex) = normalize_hex(value) {
            return self.classify(&ResolvedColor { hex, theme: None });
        }
        self.is_class(value).then(|| value.to_string())
    }

    fn is_class(&self, value: &str) -> bool {
        self.rules.exact.values().any(|c| c == value)
            || self.rules.theme.values().any(|c| c == value)
            || self.rules.tolerance.iter().any(|r| r.class == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(name: &str) -> Option<&'static str> {
        match name {
            "accent1" => Some("4472C4"),
            "dk1" => Some("000000"),
            "accent2" => Some("ED7D31"),
            _ => None,
        }
    }

    #[test]
    fn explicit_color_wins() {
        let color = RunColor {
            explicit: Some("ff0000".into()),
            theme: Some("accent1".into()),
            highlight: Some("yellow".into()),
            ..Default::default()
        };
        assert_eq!(resolve_color(&color, theme).unwrap().hex, "FF0000");
    }

    #[test]
    fn auto_falls_through_to_theme() {
        let color = RunColor {
            explicit: Some("auto".into()),
            theme: Some("accent1".into()),
            ..Default::default()
        };
        let resolved = resolve_color(&color, theme).unwrap();
        assert_eq!(resolved.hex, "4472C4");
        assert_eq!(resolved.theme.as_deref(), Some("accent1"));
    }

    #[test]
    fn theme_aliases_resolve() {
        let color = RunColor {
            theme: Some("text1".into()),
            ..Default::default()
        };
        assert_eq!(resolve_color(&color, theme).unwrap().hex, "000000");
    }

    #[test]
    fn tint_lightens_and_shade_darkens() {
        let tinted = RunColor {
            theme: Some("accent1".into()),
            tint: Some(0x99),
            ..Default::default()
        };
        // 0x44 * 0.6 + 255 * 0.4 = 142.8
        assert_eq!(resolve_color(&tinted, theme).unwrap().hex, "8FAADC");

        let shaded = RunColor {
            theme: Some("accent2".into()),
            shade: Some(0x80),
            ..Default::default()
        };
        assert_eq!(resolve_color(&shaded, theme).unwrap().hex, "773F19");
    }

    #[test]
    fn highlight_then_fill_are_last_resorts() {
        let highlighted = RunColor {
            theme: Some("missing".into()),
            highlight: Some("darkRed".into()),
            fill: Some("00FF00".into()),
            ..Default::default()
        };
        assert_eq!(resolve_color(&highlighted, theme).unwrap().hex, "800000");

        let filled = RunColor {
            fill: Some("00ff00".into()),
            ..Default::default()
        };
        assert_eq!(resolve_color(&filled, theme).unwrap().hex, "00FF00");
        assert_eq!(resolve_color(&RunColor::default(), theme), None);
    }

    #[test]
    fn classification_order() {
        let mut rules = ColorRules::default();
        rules.theme.insert("accent1".into(), "brand".into());
        let classifier = ColorClassifier::new(&rules);

        let exact = ResolvedColor {
            hex: "FF0000".into(),
            theme: None,
        };
        assert_eq!(classifier.classify(&exact).as_deref(), Some("red"));

        let themed = ResolvedColor {
            hex: "4472C4".into(),
            theme: Some("accent1".into()),
        };
        assert_eq!(classifier.classify(&themed).as_deref(), Some("brand"));

        let near_red = ResolvedColor {
            hex: "E81123".into(),
            theme: None,
        };
        assert_eq!(classifier.classify(&near_red).as_deref(), Some("red"));

        let grey = ResolvedColor {
            hex: "808080".into(),
            theme: None,
        };
        assert_eq!(classifier.classify(&grey), None);
    }

    #[test]
    fn classifying_a_class_does_not_oscillate() {
        let rules = ColorRules::default();
        let classifier = ColorClassifier::new(&rules);
        for input in ["FF0000", "0070C0", "00A000", "E81123", "808080", "FFC000", "#7030a0", "zzz"] {
            let once = classifier.classify_value(input);
            if let Some(class) = &once {
                let twice = classifier.classify_value(class);
                assert!(twice.is_none() || twice.as_ref() == Some(class), "{} -> {:?}", input, twice);
            }
        }
        assert_eq!(classifier.classify_value("red").as_deref(), Some("red"));
        assert_eq!(classifier.classify_value("chartreuse"), None);
    }
}
