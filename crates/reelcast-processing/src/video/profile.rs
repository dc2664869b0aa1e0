//! Fixed output profile of the broadcast clip.

/// Geometry, timing and encoder settings of every processed clip.
///
/// Only [`BroadcastProfile::STANDARD`] is used in production; the struct
/// exists so filter strings are built in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastProfile {
    pub width: u32,
    pub height: u32,
    pub bumper_seconds: u32,
    pub max_main_seconds: u32,
    pub brand_text: &'static str,
    pub bumper_font_size: u32,
    pub watermark_font_size: u32,
    pub watermark_x: u32,
    pub watermark_y: u32,
    pub video_codec: &'static str,
    pub preset: &'static str,
    pub crf: u32,
}

impl BroadcastProfile {
    pub const STANDARD: BroadcastProfile = BroadcastProfile {
        width: 1280,
        height: 720,
        bumper_seconds: 2,
        max_main_seconds: 30,
        brand_text: "ANB",
        bumper_font_size: 72,
        watermark_font_size: 24,
        watermark_x: 10,
        watermark_y: 10,
        video_codec: "libx264",
        preset: "fast",
        crf: 23,
    };

    /// lavfi source for a solid black card of bumper length.
    pub fn bumper_source(&self) -> String {
        format!(
            "color=c=black:s={}x{}:d={}",
            self.width, self.height, self.bumper_seconds
        )
    }

    /// Brand text centred on the card.
    pub fn bumper_filter(&self) -> String {
        format!(
            "drawtext=text='{}':x=(w-text_w)/2:y=(h-text_h)/2:fontsize={}:fontcolor=white",
            self.brand_text, self.bumper_font_size
        )
    }

    /// Fit inside the frame keeping aspect ratio, letterbox to exact size,
    /// then stamp the corner watermark.
    pub fn main_filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,\
             drawtext=text='{text}':x={x}:y={y}:fontsize={fs}:fontcolor=white",
            text = self.brand_text,
            x = self.watermark_x,
            y = self.watermark_y,
            fs = self.watermark_font_size,
        )
    }
}

impl Default for BroadcastProfile {
    fn default() -> Self {
        Self::STANDARD
    }
}
