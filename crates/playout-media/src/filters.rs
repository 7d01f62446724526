//! FFmpeg filter graphs for broadcast output.

use playout_models::RenderTemplate;

/// Output geometry shared by every rendered clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Letterbox any input into the broadcast frame at a constant frame rate.
pub fn fit_to_frame(frame: Frame) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p",
        w = frame.width,
        h = frame.height,
        fps = frame.fps
    )
}

/// Solid background source for generated clips.
pub fn color_source(template: &RenderTemplate, frame: Frame, seconds: u32) -> String {
    format!(
        "color=c={}:s={}x{}:r={}:d={}",
        template.background_color, frame.width, frame.height, frame.fps, seconds
    )
}

/// Silent stereo track so every output carries audio.
pub const SILENT_AUDIO: &str = "anullsrc=channel_layout=stereo:sample_rate=48000";

/// Centered title with an optional smaller line underneath.
pub fn title_card(template: &RenderTemplate, title: &str, subtitle: Option<&str>) -> String {
    let mut filter = drawtext(
        template,
        &escape_drawtext(title),
        template.font_size,
        "(h-text_h)/2",
    );
    if let Some(subtitle) = subtitle {
        let size = (template.font_size * 3 / 5).max(1);
        filter.push(',');
        filter.push_str(&drawtext(
            template,
            &escape_drawtext(subtitle),
            size,
            &format!("(h-text_h)/2+{}", template.font_size + size / 2),
        ));
    }
    filter.push_str(",format=yuv420p");
    filter
}

/// Whole seconds remaining, counting down to 1.
pub fn countdown(template: &RenderTemplate, seconds: u32) -> String {
    let text = format!("%{{eif\\:ceil({seconds}-t)\\:d}}");
    let mut filter = drawtext(template, &text, template.font_size * 2, "(h-text_h)/2");
    filter.push_str(",format=yuv420p");
    filter
}

fn drawtext(template: &RenderTemplate, text: &str, size: u32, y: &str) -> String {
    format!(
        "drawtext=text='{text}':fontcolor={}:fontsize={size}:x=(w-text_w)/2:y={y}",
        template.text_color
    )
}

/// Escape free text for a quoted drawtext `text` option.
///
/// Single quotes cannot be escaped inside a quoted filter value, so they
/// become typographic apostrophes.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push('\u{2019}'),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
