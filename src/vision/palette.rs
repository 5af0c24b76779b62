//! Palette heuristic: dominant hues from the pixels, subject from filename hints.

use super::VisualAnalyzer;
use crate::config::VisionSettings;
use crate::error::VisualAnalysisError;
use crate::schema::{clamp_confidence, ScanRequest, VisualAnalysis};
use image::GenericImageView;
use tracing::{debug, warn};

/// Longest side after downsampling; enough for a colour histogram.
const SAMPLE_SIZE: u32 = 48;

const HUES: [&str; 10] = [
    "red", "orange", "yellow", "green", "blue", "purple", "pink", "white", "black", "gray",
];

pub struct PaletteAnalyzer {
    settings: VisionSettings,
}

impl PaletteAnalyzer {
    pub fn new(settings: VisionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl VisualAnalyzer for PaletteAnalyzer {
    fn name(&self) -> &str {
        "palette"
    }

    async fn analyze_image(&self, request: &ScanRequest) -> Result<VisualAnalysis, VisualAnalysisError> {
        let data = request.data.clone();
        let min_share = self.settings.min_color_share;
        let max_tags = self.settings.max_color_tags;

        let decoded =
            tokio::task::spawn_blocking(move || dominant_colors(&data, min_share, max_tags)).await?;

        let filename = request.filename.to_lowercase();
        let hint = self
            .settings
            .subject_hints
            .iter()
            .find(|h| filename.contains(&h.fragment.to_lowercase()));

        // The subject hint does not need pixels; only a total miss is an error.
        let color_tags = match (decoded, hint) {
            (Ok(tags), _) => tags,
            (Err(e), Some(_)) => {
                warn!("Could not decode {} for palette: {}", request.filename, e);
                Vec::new()
            }
            (Err(e), None) => return Err(e.into()),
        };

        let analysis = match hint {
            Some(h) => VisualAnalysis {
                detected_subject: Some(h.subject.clone()),
                confidence: clamp_confidence(h.confidence),
                color_tags,
                feature_tags: h.features.clone(),
            },
            None => VisualAnalysis {
                detected_subject: None,
                confidence: clamp_confidence(self.settings.unknown_subject_confidence),
                color_tags,
                feature_tags: Vec::new(),
            },
        };

        debug!(
            subject = ?analysis.detected_subject,
            colors = ?analysis.color_tags,
            "Palette analysis complete"
        );
        Ok(analysis)
    }
}

/// Named hues covering at least `min_share` of the sampled pixels, most
/// frequent first.
fn dominant_colors(data: &[u8], min_share: f64, max_tags: usize) -> Result<Vec<String>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let sample = if img.width() > SAMPLE_SIZE || img.height() > SAMPLE_SIZE {
        img.thumbnail(SAMPLE_SIZE, SAMPLE_SIZE)
    } else {
        img
    };

    let mut counts = [0usize; HUES.len()];
    let mut total = 0usize;
    for (_, _, pixel) in sample.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < 16 {
            continue;
        }
        counts[hue_bucket(r, g, b)] += 1;
        total += 1;
    }

    if total == 0 {
        return Ok(Vec::new());
    }

    let mut ranked: Vec<(usize, usize)> = counts
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, count)| count as f64 / total as f64 >= min_share)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    Ok(ranked
        .into_iter()
        .take(max_tags)
        .map(|(bucket, _)| HUES[bucket].to_string())
        .collect())
}

/// Index into [`HUES`] for an RGB pixel.
fn hue_bucket(r: u8, g: u8, b: u8) -> usize {
    let (r, g, b) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    if saturation < 0.2 {
        return if max > 0.85 {
            7
        } else if max < 0.2 {
            8
        } else {
            9
        };
    }
    if max < 0.2 {
        return 8;
    }

    let hue = if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    match hue {
        h if h < 15.0 => 0,
        h if h < 45.0 => 1,
        h if h < 70.0 => 2,
        h if h < 170.0 => 3,
        h if h < 260.0 => 4,
        h if h < 300.0 => 5,
        h if h < 345.0 => 6,
        _ => 0,
    }
}
