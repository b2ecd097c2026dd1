//! Camera configuration file.
//!
//! One camera per line, whitespace separated:
//!
//! ```text
//! ip username password channel [WIDTHxHEIGHT] [x,y x,y x,y] [x,y ...]
//! ```
//!
//! `#` starts a comment line. The resolution may use `x` or `*` and defaults to
//! 1920x1080. Each bracketed group is one exclusion polygon.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::mask::{ExclusionMask, ExclusionZone, Point};

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

#[derive(Clone, PartialEq, Eq)]
pub struct CameraSpec {
    pub ip: String,
    pub username: String,
    pub password: String,
    pub channel: u32,
    pub width: u32,
    pub height: u32,
    pub zones: Vec<ExclusionZone>,
    /// `"{ip}_Ch{channel}_{n}"`, `n` counting repeats of the same ip and channel.
    pub unique_id: String,
}

impl fmt::Debug for CameraSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSpec")
            .field("ip", &self.ip)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("channel", &self.channel)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("zones", &self.zones.len())
            .field("unique_id", &self.unique_id)
            .finish()
    }
}

impl CameraSpec {
    pub fn build_mask(&self) -> ExclusionMask {
        ExclusionMask::build(self.width, self.height, &self.zones)
    }

    /// `mask_{ip}_ch{channel}.png` with path-unsafe characters replaced.
    pub fn mask_file_name(&self) -> String {
        let ip: String = self
            .ip
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '\\') { '_' } else { c })
            .collect();
        format!("mask_{}_ch{}.png", ip, self.channel)
    }
}

pub fn load_camera_config(path: &Path) -> Result<Vec<CameraSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read camera config {}", path.display()))?;
    let cameras = parse_camera_config(&text);
    log::info!("{} camera(s) configured in {}", cameras.len(), path.display());
    Ok(cameras)
}

/// Parse every usable line. Malformed lines are skipped with a warning.
pub fn parse_camera_config(text: &str) -> Vec<CameraSpec> {
    let mut repeats: HashMap<String, u32> = HashMap::new();
    let mut cameras = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(mut camera) = parse_line(line) else {
            log::warn!("camera config line {} skipped: {}", lineno + 1, line);
            continue;
        };
        let base = format!("{}_Ch{}", camera.ip, camera.channel);
        let n = repeats.entry(base.clone()).or_insert(0);
        *n += 1;
        camera.unique_id = format!("{}_{}", base, n);
        cameras.push(camera);
    }
    cameras
}

fn parse_line(line: &str) -> Option<CameraSpec> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let channel = tokens[3].parse::<u32>().ok()?;

    let mut rest = &tokens[4..];
    let (mut width, mut height) = (DEFAULT_WIDTH, DEFAULT_HEIGHT);
    if let Some(first) = rest.first() {
        if !first.starts_with('[') {
            if let Some((w, h)) = parse_resolution(first) {
                width = w;
                height = h;
            }
            rest = &rest[1..];
        }
    }

    let zones = polygon_groups(rest)
        .into_iter()
        .filter_map(|points| ExclusionZone::new(points, width, height))
        .collect();

    Some(CameraSpec {
        ip: tokens[0].to_string(),
        username: tokens[1].to_string(),
        password: tokens[2].to_string(),
        channel,
        width,
        height,
        zones,
        unique_id: String::new(),
    })
}

fn parse_resolution(token: &str) -> Option<(u32, u32)> {
    let (w, h) = token.split_once(|c| matches!(c, 'x' | 'X' | '*'))?;
    let w = w.parse::<u32>().ok().filter(|v| *v > 0)?;
    let h = h.parse::<u32>().ok().filter(|v| *v > 0)?;
    Some((w, h))
}

/// Points of every `[...]` group; a group may span several tokens.
fn polygon_groups(tokens: &[&str]) -> Vec<Vec<Point>> {
    let mut groups = Vec::new();
    let mut current: Option<Vec<Point>> = None;
    for token in tokens {
        let mut body = *token;
        if let Some(stripped) = body.strip_prefix('[') {
            if let Some(unfinished) = current.take() {
                groups.push(unfinished);
            }
            current = Some(Vec::new());
            body = stripped;
        }
        let Some(points) = current.as_mut() else {
            continue;
        };
        let closes = body.contains(']');
        let body = body.split(']').next().unwrap_or("");
        if let Some(point) = parse_point(body) {
            points.push(point);
        }
        if closes {
            if let Some(done) = current.take() {
                groups.push(done);
            }
        }
    }
    if let Some(unfinished) = current {
        groups.push(unfinished);
    }
    groups
}

fn parse_point(token: &str) -> Option<Point> {
    let (x, y) = token.split_once(',')?;
    Some(Point::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# lobby cameras
192.168.1.64 admin secret 1 1280*720 [10,10 200,10 200,200] [300,300 400,300 400,400 300,400]

192.168.1.64 admin secret 1
192.168.1.65 admin secret 2 640x480 [0,0 5000,0 5000,5000]
broken line
192.168.1.66 admin secret two
";

    #[test]
    fn parses_cameras_and_zones() {
        let cameras = parse_camera_config(SAMPLE);
        assert_eq!(cameras.len(), 3);

        let first = &cameras[0];
        assert_eq!(first.ip, "192.168.1.64");
        assert_eq!((first.width, first.height), (1280, 720));
        assert_eq!(first.zones.len(), 2);
        assert_eq!(first.zones[0].points().len(), 4);
        assert_eq!(first.zones[0].points()[3], Point::new(10, 10));
        assert_eq!(first.unique_id, "192.168.1.64_Ch1_1");

        let second = &cameras[1];
        assert_eq!((second.width, second.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert!(second.zones.is_empty());
        assert_eq!(second.unique_id, "192.168.1.64_Ch1_2");

        let third = &cameras[2];
        assert_eq!((third.width, third.height), (640, 480));
        assert_eq!(third.zones[0].points()[1], Point::new(639, 0));
        assert_eq!(third.zones[0].points()[2], Point::new(639, 479));
    }

    #[test]
    fn short_polygons_and_bad_points_are_dropped() {
        let cameras = parse_camera_config("10.0.0.1 u p 3 [1,1 2,2] [1,1 a,b 9,1 9,9 1,9]");
        let camera = &cameras[0];
        assert_eq!(camera.zones.len(), 1);
        assert_eq!(camera.zones[0].points().len(), 5);
    }

    #[test]
    fn unparsable_resolution_keeps_default() {
        let cameras = parse_camera_config("10.0.0.1 u p 3 wide [0,0 9,0 9,9]");
        assert_eq!(cameras[0].width, DEFAULT_WIDTH);
        assert_eq!(cameras[0].zones.len(), 1);
    }

    #[test]
    fn mask_file_name_is_path_safe() {
        let cameras = parse_camera_config("stub://lobby:8000 u p 2");
        assert_eq!(cameras[0].mask_file_name(), "mask_stub___lobby_8000_ch2.png");
        assert!(!format!("{:?}", cameras[0]).contains("\"p\""));
    }

    #[test]
    fn mask_matches_camera_resolution() {
        let cameras = parse_camera_config("10.0.0.1 u p 1 64x32 [0,0 63,0 63,31 0,31]");
        let mask = cameras[0].build_mask();
        assert_eq!((mask.width(), mask.height()), (64, 32));
        assert_eq!(mask.level_at(Point::new(10, 10)), 255);
    }
}
