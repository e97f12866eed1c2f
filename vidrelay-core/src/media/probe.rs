use serde::{Deserialize, Serialize};

/// Stream properties reported by the probe. Every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
}

impl MediaInfo {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.duration.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parses `ffprobe -of json` output; malformed input yields unknown fields.
pub fn parse_probe_output(stdout: &[u8]) -> MediaInfo {
    let Ok(parsed) = serde_json::from_slice::<ProbeOutput>(stdout) else {
        return MediaInfo::default();
    };
    let stream = parsed.streams.into_iter().next();
    let duration = parsed
        .format
        .and_then(|format| format.duration)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0);
    MediaInfo {
        width: stream.as_ref().and_then(|s| s.width),
        height: stream.as_ref().and_then(|s| s.height),
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_probe() {
        let raw = br#"{"programs":[],"streams":[{"width":1920,"height":1080}],"format":{"duration":"3600.040000"}}"#;
        let info = parse_probe_output(raw);
        assert_eq!(info.dimensions(), Some((1920, 1080)));
        assert_eq!(info.duration, Some(3600.04));
    }

    #[test]
    fn missing_fields_degrade_to_unknown() {
        let info = parse_probe_output(br#"{"streams":[],"format":{"duration":"N/A"}}"#);
        assert!(info.is_empty());
        assert!(parse_probe_output(b"not json").is_empty());
        let info = parse_probe_output(br#"{"streams":[{"width":640}]}"#);
        assert_eq!(info.width, Some(640));
        assert_eq!(info.dimensions(), None);
    }
}
