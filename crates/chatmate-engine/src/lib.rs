use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chatmate_contracts::analysis::{
    Analysis, AnalysisMessage, ColorTheme, EloEstimate, OpponentNames,
};
use chatmate_contracts::chat::{Classification, Conversation, Side};
use chatmate_contracts::color::{Rgb, RenderTheme};
use chrono::Weekday;
use image::imageops::FilterType;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use indexmap::IndexMap;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Process-wide layout constants. Fixed at engine construction and never
/// mutated; every geometry value the two render passes share comes from
/// here.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub canvas_width: u32,
    pub padding: f32,
    pub avatar_size: f32,
    pub bubble_radius: f32,
    pub max_bubble_width: f32,
    pub font_px: f32,
    pub line_height_factor: f32,
    pub bubble_width_margin: f32,
    pub bubble_width_slack: f32,
    pub badge_height: f32,
    pub initials_px: f32,
    pub background: Rgb,
    pub avatar_fill: Rgb,
    pub initials_color: Rgb,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            canvas_width: 650,
            padding: 16.0,
            avatar_size: 48.0,
            bubble_radius: 14.0,
            max_bubble_width: 300.0,
            font_px: 18.0,
            line_height_factor: 1.4,
            bubble_width_margin: 10.0,
            bubble_width_slack: 60.0,
            badge_height: 55.0,
            initials_px: 20.0,
            background: Rgb::new(0x18, 0x18, 0x1b),
            avatar_fill: Rgb::new(0x71, 0x71, 0x7a),
            initials_color: Rgb::new(0xff, 0xff, 0xff),
        }
    }
}

impl RenderConfig {
    pub fn line_height(&self) -> f32 {
        self.font_px * self.line_height_factor
    }

    /// Width available to wrapped text inside a bubble.
    pub fn bubble_interior_width(&self) -> f32 {
        self.max_bubble_width - 2.0 * self.padding
    }
}

/// Measurement-only capability: what the sizing pass needs, and nothing
/// more. Deliberately narrower than the pixel-owning surface.
pub trait TextMeasure {
    fn line_width(&self, px: f32, text: &str) -> f32;
}

/// Full glyph painting on top of measurement. The render pass needs this;
/// the measurement pass must not.
pub trait TextPaint: TextMeasure + Send + Sync {
    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        color: Rgba<u8>,
        x: i32,
        y: i32,
        px: f32,
        text: &str,
    );
}

/// Production font backed by a TrueType face. Loading happens once at engine
/// construction; a missing or unparseable face is a fatal configuration
/// error since both passes depend on its metrics.
pub struct TrueTypeFont {
    font: FontArc,
}

impl TrueTypeFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = FontArc::try_from_vec(bytes).context("font data is not a parseable face")?;
        Ok(Self { font })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed reading font {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("failed loading font {}", path.display()))
    }
}

impl TextMeasure for TrueTypeFont {
    fn line_width(&self, px: f32, text: &str) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(px));
        text.chars()
            .map(|ch| scaled.h_advance(self.font.glyph_id(ch)))
            .sum()
    }
}

impl TextPaint for TrueTypeFont {
    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        color: Rgba<u8>,
        x: i32,
        y: i32,
        px: f32,
        text: &str,
    ) {
        draw_text_mut(canvas, color, x, y, PxScale::from(px), &self.font, text);
    }
}

/// Deterministic stand-in font: every character advances the same fraction
/// of the pixel size and lines paint as solid blocks. The offline twin of
/// the real face, for dryrun renders and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvanceFont {
    pub advance_em: f32,
}

impl Default for FixedAdvanceFont {
    fn default() -> Self {
        Self { advance_em: 0.6 }
    }
}

impl TextMeasure for FixedAdvanceFont {
    fn line_width(&self, px: f32, text: &str) -> f32 {
        text.chars().count() as f32 * px * self.advance_em
    }
}

impl TextPaint for FixedAdvanceFont {
    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        color: Rgba<u8>,
        x: i32,
        y: i32,
        px: f32,
        text: &str,
    ) {
        let width = self.line_width(px, text).round() as i32;
        let height = (px * 0.75).round() as i32;
        if width < 1 || height < 1 {
            return;
        }
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, y + (px * 0.15).round() as i32).of_size(width as u32, height as u32),
            color,
        );
    }
}

/// Greedy word wrap with a hard-break fallback. Words are appended while the
/// candidate line still measures within `max_width`; a word that cannot fit
/// on any line on its own is split at the widest character prefix that fits,
/// repeatedly, until the residue fits. No returned line measures wider than
/// `max_width` (a single character wider than `max_width` still gets a line
/// of its own, since character splitting cannot go further).
pub fn wrap_text<M: TextMeasure + ?Sized>(
    measure: &M,
    px: f32,
    text: &str,
    max_width: f32,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split(' ') {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };

        if measure.line_width(px, &candidate) > max_width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        } else {
            current = candidate;
        }

        while measure.line_width(px, &current) > max_width {
            let mut fit = 0usize;
            let mut packed = 0.0f32;
            for ch in current.chars() {
                let advance = measure.line_width(px, &ch.to_string());
                if packed + advance > max_width {
                    break;
                }
                packed += advance;
                fit += 1;
            }
            let fit = fit.max(1);
            let head: String = current.chars().take(fit).collect();
            let tail: String = current.chars().skip(fit).collect();
            lines.push(head);
            current = tail;
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Placement and size of one message bubble, with its wrapped lines. A pure
/// function of content, side, and config; both passes recompute it and must
/// agree exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleGeometry {
    pub x: f32,
    pub width: f32,
    pub height: f32,
    pub lines: Vec<String>,
}

pub fn bubble_geometry<M: TextMeasure + ?Sized>(
    config: &RenderConfig,
    measure: &M,
    content: &str,
    side: Side,
) -> BubbleGeometry {
    let px = config.font_px;
    let lines = wrap_text(measure, px, content, config.bubble_interior_width());
    let height = lines.len() as f32 * config.line_height() + 2.0 * config.padding;

    let max_line_width = lines
        .iter()
        .map(|line| measure.line_width(px, line))
        .fold(0.0f32, f32::max);
    let max_word_width = content
        .split_whitespace()
        .map(|word| measure.line_width(px, word))
        .fold(0.0f32, f32::max);

    // The bubble is never narrower than its widest unbreakable token.
    let min_width = max_word_width + 2.0 * config.padding;
    let width = (max_line_width + 2.0 * config.padding + config.bubble_width_margin)
        .max(min_width)
        .min(config.max_bubble_width)
        + config.bubble_width_slack;

    let x = match side {
        Side::Left => config.avatar_size + 2.0 * config.padding,
        Side::Right => {
            config.canvas_width as f32 - width - config.avatar_size - 3.0 * config.padding
        }
    };

    BubbleGeometry {
        x,
        width,
        height,
        lines,
    }
}

/// Horizontal badge position: badges always point away from the canvas
/// midline, regardless of which side the message is on.
pub fn badge_x(config: &RenderConfig, bubble: &BubbleGeometry, badge_width: f32) -> f32 {
    let bubble_center = bubble.x + bubble.width / 2.0;
    let canvas_center = config.canvas_width as f32 / 2.0;
    if bubble_center < canvas_center {
        bubble.x + bubble.width + config.padding
    } else {
        bubble.x - badge_width - config.padding
    }
}

/// Immutable in-memory badge catalog, prefetched once at engine
/// construction. Missing or undecodable assets become warnings, never
/// errors; the affected badge is simply omitted at render time.
pub struct BadgeAtlas {
    icons: IndexMap<String, RgbaImage>,
    warnings: Vec<String>,
}

impl BadgeAtlas {
    pub fn load(dir: &Path) -> Self {
        let mut icons = IndexMap::new();
        let mut warnings = Vec::new();
        for key in Classification::badge_asset_keys() {
            let path = dir.join(format!("{key}.png"));
            match image::open(&path) {
                Ok(icon) => {
                    icons.insert(key, icon.to_rgba8());
                }
                Err(err) => warnings.push(format!(
                    "badge '{key}' unavailable ({}): {err}",
                    path.display()
                )),
            }
        }
        Self { icons, warnings }
    }

    /// An atlas with no assets at all; renders proceed without badges and
    /// without load warnings.
    pub fn empty() -> Self {
        Self {
            icons: IndexMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RgbaImage> {
        self.icons.get(key)
    }

    pub fn available(&self) -> Vec<String> {
        self.icons.keys().cloned().collect()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// A finished render: encoded PNG plus the dimensions it was sized to and
/// any decorative omissions collected along the way.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub warnings: Vec<String>,
}

/// Conversation renderer. Owns the font and badge atlas immutably after
/// construction, so `&self` renders are re-entrant; all per-call state lives
/// on the stack of `render`.
pub struct ChatRenderer {
    config: RenderConfig,
    font: Box<dyn TextPaint>,
    badges: BadgeAtlas,
}

impl ChatRenderer {
    pub fn new(config: RenderConfig, font: Box<dyn TextPaint>, badges: BadgeAtlas) -> Self {
        Self {
            config,
            font,
            badges,
        }
    }

    /// Production constructor: TrueType face from `font_path` (fatal when
    /// missing), badge atlas prefetched from `badge_dir`.
    pub fn with_assets(config: RenderConfig, font_path: &Path, badge_dir: &Path) -> Result<Self> {
        let font = TrueTypeFont::from_path(font_path)?;
        let badges = BadgeAtlas::load(badge_dir);
        Ok(Self::new(config, Box::new(font), badges))
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn badge_warnings(&self) -> &[String] {
        self.badges.warnings()
    }

    /// Measurement pass: the exact surface height the render pass will
    /// allocate, computed without touching any pixels.
    pub fn measure_total_height(&self, conversation: &Conversation) -> f32 {
        let mut total = self.config.padding;
        for message in conversation.messages() {
            let geometry = bubble_geometry(
                &self.config,
                self.font.as_ref(),
                &message.content,
                message.side,
            );
            total += self.message_advance(&geometry);
        }
        total
    }

    /// Renders the conversation top to bottom in input order and returns the
    /// encoded PNG. Either a complete image is produced or the call fails;
    /// badge misses degrade to warnings.
    pub fn render(&self, conversation: &Conversation, theme: &RenderTheme) -> Result<RenderOutcome> {
        let height = self.measure_total_height(conversation).ceil() as u32;
        let height = height.max(1);
        let width = self.config.canvas_width;

        let mut canvas = RgbaImage::from_pixel(width, height, opaque(self.config.background));
        let mut warnings = Vec::new();

        let mut y = self.config.padding;
        for message in conversation.messages() {
            let geometry = bubble_geometry(
                &self.config,
                self.font.as_ref(),
                &message.content,
                message.side,
            );

            let avatar_x = if message.side.is_right() {
                width as f32 - self.config.avatar_size - self.config.padding
            } else {
                self.config.padding
            };
            self.draw_avatar(&mut canvas, avatar_x, y, &message.username);

            let bubble_fill = match message.side {
                Side::Left => theme.bubble_left,
                Side::Right => theme.bubble_right,
            };
            draw_rounded_rect_mut(
                &mut canvas,
                geometry.x,
                y,
                geometry.width,
                geometry.height,
                self.config.bubble_radius,
                opaque(bubble_fill),
            );

            let text_color = match message.side {
                Side::Left => theme.text_left,
                Side::Right => theme.text_right,
            };
            for (index, line) in geometry.lines.iter().enumerate() {
                let text_x = geometry.x + self.config.padding;
                let text_y = y + self.config.padding + index as f32 * self.config.line_height();
                self.font.draw_line(
                    &mut canvas,
                    opaque(text_color),
                    text_x.round() as i32,
                    text_y.round() as i32,
                    self.config.font_px,
                    line,
                );
            }

            if let Some(classification) = message.classification {
                if let Some(key) = classification.badge_key(message.side) {
                    match self.badges.get(&key) {
                        Some(icon) => self.draw_badge(&mut canvas, icon, &geometry, y),
                        None => {
                            warnings.push(format!("badge omitted: no asset for '{key}'"));
                        }
                    }
                }
            }

            y += self.message_advance(&geometry);
        }

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("PNG encoding failed")?;

        Ok(RenderOutcome {
            png,
            width,
            height,
            warnings,
        })
    }

    /// Per-message cursor advance. Shared verbatim by both passes; any
    /// divergence here truncates or overflows the output.
    fn message_advance(&self, geometry: &BubbleGeometry) -> f32 {
        geometry.height.max(self.config.avatar_size) + self.config.padding
    }

    fn draw_avatar(&self, canvas: &mut RgbaImage, x: f32, y: f32, username: &str) {
        let radius = self.config.avatar_size / 2.0;
        let center_x = x + radius;
        let center_y = y + radius;
        draw_filled_circle_mut(
            canvas,
            (center_x.round() as i32, center_y.round() as i32),
            radius.round() as i32,
            opaque(self.config.avatar_fill),
        );

        let initials = initials(username);
        if initials.is_empty() {
            return;
        }
        let px = self.config.initials_px;
        let text_width = self.font.line_width(px, &initials);
        self.font.draw_line(
            canvas,
            opaque(self.config.initials_color),
            (center_x - text_width / 2.0).round() as i32,
            (center_y - px / 2.0).round() as i32,
            px,
            &initials,
        );
    }

    fn draw_badge(
        &self,
        canvas: &mut RgbaImage,
        icon: &RgbaImage,
        geometry: &BubbleGeometry,
        bubble_y: f32,
    ) {
        let badge_height = self.config.badge_height;
        let badge_width = icon.width() as f32 / icon.height() as f32 * badge_height;
        let resized = imageops::resize(
            icon,
            (badge_width.round() as u32).max(1),
            (badge_height.round() as u32).max(1),
            FilterType::Lanczos3,
        );
        let x = badge_x(&self.config, geometry, badge_width);
        let y = bubble_y + (geometry.height - badge_height) / 2.0;
        imageops::overlay(canvas, &resized, x.round() as i64, y.round() as i64);
    }
}

fn initials(username: &str) -> String {
    username
        .split_whitespace()
        .take(2)
        .filter_map(|token| token.chars().next())
        .flat_map(|ch| ch.to_uppercase())
        .collect()
}

fn opaque(color: Rgb) -> Rgba<u8> {
    Rgba([color.r, color.g, color.b, 0xff])
}

fn draw_rounded_rect_mut(
    canvas: &mut RgbaImage,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    radius: f32,
    color: Rgba<u8>,
) {
    let xi = x.round() as i32;
    let yi = y.round() as i32;
    let wi = (width.round() as i32).max(1);
    let hi = (height.round() as i32).max(1);
    let ri = (radius.min(width / 2.0).min(height / 2.0).round() as i32).max(0);

    if hi > 2 * ri {
        draw_filled_rect_mut(
            canvas,
            Rect::at(xi, yi + ri).of_size(wi as u32, (hi - 2 * ri) as u32),
            color,
        );
    }
    if ri > 0 && wi > 2 * ri {
        draw_filled_rect_mut(
            canvas,
            Rect::at(xi + ri, yi).of_size((wi - 2 * ri) as u32, ri as u32),
            color,
        );
        draw_filled_rect_mut(
            canvas,
            Rect::at(xi + ri, yi + hi - ri).of_size((wi - 2 * ri) as u32, ri as u32),
            color,
        );
    }
    if ri > 0 {
        for (cx, cy) in [
            (xi + ri, yi + ri),
            (xi + wi - ri - 1, yi + ri),
            (xi + ri, yi + hi - ri - 1),
            (xi + wi - ri - 1, yi + hi - ri - 1),
        ] {
            draw_filled_circle_mut(canvas, (cx, cy), ri, color);
        }
    }
}

/// One analysis invocation: the transcript lines (oldest first), an optional
/// conversation screenshot, the model to use, and the weekday used to gate
/// the day-restricted classifications.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub transcript: Vec<String>,
    pub screenshot: Option<PathBuf>,
    pub model: String,
    pub weekday: Weekday,
}

impl AnalysisRequest {
    pub fn allowed_classifications(&self) -> Vec<&'static str> {
        Classification::ALL
            .iter()
            .filter(|classification| classification.allowed_on(self.weekday))
            .map(|classification| classification.name())
            .collect()
    }
}

pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis>;
}

#[derive(Default)]
pub struct AnalysisProviderRegistry {
    providers: BTreeMap<String, Box<dyn AnalysisProvider>>,
}

impl AnalysisProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: AnalysisProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn AnalysisProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_analysis_registry() -> AnalysisProviderRegistry {
    let mut registry = AnalysisProviderRegistry::new();
    registry.register(DryrunAnalysisProvider);
    registry.register(GeminiAnalysisProvider::new());
    registry
}

const ANALYSIS_SYSTEM_PROMPT: &str = "\
You analyze casual text conversations between two participants the way a \
chess engine reviews a game.

Input: a chat log, one line per message, in the form `Username: message`, \
oldest first. The log may include messages from bystanders; decide who the \
two opponents are, ignore everything from non-opponents, and classify every \
message from the opponents.

Move classifications: Brilliant (an extremely clever message, often turning \
a losing position into a winning one), Great (very hard to find), Best (the \
strongest available message), Excellent (above average), Good (average), \
Inaccuracy (a weak message or misstep), Mistake (as the name implies), Miss \
(a missed opportunity), Blunder (a devastating mistake). Special \
classifications: Book (a standard opening message), Forced (realistically \
the only move), Interesting (could go either way). Result classifications: \
Abandon, Checkmated, Draw, Resign, Timeout, Winner. Day-restricted tags \
may appear in the allowed set: Megablunder (the absolute worst of the \
worst) and Superbrilliant (beyond brilliant).

Also produce: a creative chess-opening-style name for the conversation, a \
one-sentence commentary, estimated Elo ratings for both sides, the opponent \
usernames, and a chat color theme.";

/// Live analysis over the Gemini generateContent API, blocking HTTP with
/// bounded transport retries. The response is constrained to the analysis
/// JSON schema, so a successful call parses directly into `Analysis`.
pub struct GeminiAnalysisProvider {
    api_base: String,
    http: HttpClient,
}

const GEMINI_REQUEST_TIMEOUT_S: f64 = 90.0;
const GEMINI_TRANSPORT_RETRIES: usize = 2;
const GEMINI_RETRY_BACKOFF_S: f64 = 1.2;

impl GeminiAnalysisProvider {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn response_schema(allowed_classifications: &[&str]) -> Value {
        let side_color = json!({
            "type": "OBJECT",
            "nullable": true,
            "properties": {
                "label": { "type": "STRING" },
                "bubble_hex": { "type": "STRING" },
                "text_hex": { "type": "STRING" },
            },
            "required": ["label", "bubble_hex", "text_hex"],
        });
        json!({
            "type": "OBJECT",
            "properties": {
                "messages": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "side": { "type": "STRING", "enum": ["left", "right"] },
                            "content": { "type": "STRING" },
                            "classification": {
                                "type": "STRING",
                                "enum": allowed_classifications,
                            },
                        },
                        "required": ["side", "content", "classification"],
                    },
                },
                "elo": {
                    "type": "OBJECT",
                    "properties": {
                        "left": { "type": "INTEGER", "nullable": true },
                        "right": { "type": "INTEGER", "nullable": true },
                    },
                },
                "opponents": {
                    "type": "OBJECT",
                    "properties": {
                        "left": { "type": "STRING" },
                        "right": { "type": "STRING" },
                    },
                },
                "color": {
                    "type": "OBJECT",
                    "properties": {
                        "left": side_color.clone(),
                        "right": side_color,
                        "background_hex": { "type": "STRING" },
                    },
                    "required": ["background_hex"],
                },
                "opening_name": { "type": "STRING" },
                "comment": { "type": "STRING" },
                "vote_target": {
                    "type": "STRING",
                    "enum": ["left", "right"],
                    "nullable": true,
                },
            },
            "required": ["messages", "elo", "color", "opening_name", "comment"],
        })
    }

    fn safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_CIVIC_INTEGRITY",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "OFF",
            })
        })
        .collect()
    }

    fn build_payload(&self, request: &AnalysisRequest) -> Result<Value> {
        let mut parts = Vec::new();
        if let Some(screenshot) = request.screenshot.as_ref() {
            parts.push(image_part_from_path(screenshot)?);
        }
        if !request.transcript.is_empty() {
            parts.push(json!({ "text": request.transcript.join("\n") }));
        }
        if parts.is_empty() {
            bail!("analysis request has neither transcript nor screenshot");
        }

        let allowed = request.allowed_classifications();
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "systemInstruction": {
                "parts": [{ "text": ANALYSIS_SYSTEM_PROMPT }],
            },
            "generationConfig": {
                "temperature": 0,
                "responseMimeType": "application/json",
                "responseSchema": Self::response_schema(&allowed),
                "thinkingConfig": { "thinkingBudget": 512 },
            },
            "safetySettings": Self::safety_settings(),
        }))
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<reqwest::blocking::Response> {
        for attempt in 0..=GEMINI_TRANSPORT_RETRIES {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(GEMINI_REQUEST_TIMEOUT_S))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let retryable = raw.is_timeout() || raw.is_connect();
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !retryable || attempt >= GEMINI_TRANSPORT_RETRIES {
                        return Err(err);
                    }
                    let delay_s = GEMINI_RETRY_BACKOFF_S * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        unreachable!("transport retry loop always returns a response or error")
    }

    fn extract_text(response_payload: &Value) -> Result<String> {
        let parts = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() {
            bail!("Gemini response contained no text candidates");
        }
        Ok(text)
    }
}

impl Default for GeminiAnalysisProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisProvider for GeminiAnalysisProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = self.build_payload(request)?;

        let response = self.post_with_transport_retries(&endpoint, &api_key, &payload)?;
        let status = response.status();
        let body = response.text().context("Gemini response body unreadable")?;
        if !status.is_success() {
            bail!(
                "Gemini returned HTTP {}: {}",
                status.as_u16(),
                truncate_text(&body, 400)
            );
        }

        let parsed: Value =
            serde_json::from_str(&body).context("Gemini response was not valid JSON")?;
        let text = Self::extract_text(&parsed)?;
        Analysis::from_json(&text)
    }
}

/// Offline analysis twin: derives a stable review from a hash of the
/// transcript, no network required. Same transcript, same weekday, same
/// review, every time.
pub struct DryrunAnalysisProvider;

impl DryrunAnalysisProvider {
    fn stable_hash(input: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ])
    }
}

impl AnalysisProvider for DryrunAnalysisProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis> {
        if request.transcript.is_empty() {
            if request.screenshot.is_some() {
                bail!("dryrun provider cannot read screenshots; supply a transcript");
            }
            bail!("transcript is empty");
        }

        let move_tags: Vec<Classification> = Classification::ALL
            .into_iter()
            .filter(|classification| {
                classification.counts_in_tally() && classification.allowed_on(request.weekday)
            })
            .collect();

        let mut opponents: Vec<String> = Vec::new();
        let mut messages = Vec::new();
        for line in &request.transcript {
            let Some((username, content)) = line.split_once(':') else {
                continue;
            };
            let username = username.trim();
            let content = content.trim();
            if username.is_empty() || content.is_empty() {
                continue;
            }
            if !opponents.iter().any(|known| known == username) {
                if opponents.len() == 2 {
                    // Bystander; the review only covers the two opponents.
                    continue;
                }
                opponents.push(username.to_string());
            }
            let side = if opponents.first().map(String::as_str) == Some(username) {
                Side::Left
            } else {
                Side::Right
            };
            let tag = move_tags[(Self::stable_hash(line) % move_tags.len() as u64) as usize];
            messages.push(AnalysisMessage {
                side,
                content: content.to_string(),
                classification: tag.name().to_string(),
            });
        }

        if messages.is_empty() {
            bail!("transcript held no `Username: message` lines");
        }

        let elo_for = |name: Option<&String>| -> Option<i64> {
            name.map(|value| 100 + (Self::stable_hash(value) % 2101) as i64)
        };

        Ok(Analysis {
            elo: EloEstimate {
                left: elo_for(opponents.first()),
                right: elo_for(opponents.get(1)),
            },
            opponents: OpponentNames {
                left: opponents.first().cloned(),
                right: opponents.get(1).cloned(),
            },
            color: ColorTheme::default(),
            opening_name: "Prepared Line: Deterministic Variation".to_string(),
            comment: "Both sides follow the book; the engine sees nothing new.".to_string(),
            vote_target: None,
            messages,
        })
    }
}

fn image_part_from_path(path: &Path) -> Result<Value> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(json!({
        "inlineData": {
            "mimeType": mime,
            "data": BASE64.encode(bytes),
        }
    }))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        _ => None,
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
